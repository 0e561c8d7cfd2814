//! REST history collaborator: paginated fetch plus edit/delete mutations
//! used as a durability backstop behind the live channel.
//!
//! Routes (relative to `CHAT_API_URL`):
//! - `GET    /rooms/{room_id}/messages?offset=&limit=` newest first
//! - `PATCH  /messages/{message_id}` with `{"content": ...}`
//! - `DELETE /messages/{message_id}`

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ConnectivityError, SyncError};
use crate::stream::PageRequest;
use crate::types::Message;

#[async_trait::async_trait]
pub trait HistoryApi: Send + Sync {
    /// Fetch one page of a room's history, newest first.
    ///
    /// # Errors
    ///
    /// Connectivity, remote-rejection, or parse errors from the REST call.
    async fn fetch_page(&self, room_id: &str, page: PageRequest) -> Result<Vec<Message>, SyncError>;

    /// Persist an edit.
    ///
    /// # Errors
    ///
    /// Connectivity or remote-rejection errors from the REST call.
    async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), SyncError>;

    /// Persist a deletion.
    ///
    /// # Errors
    ///
    /// Connectivity or remote-rejection errors from the REST call.
    async fn delete_message(&self, message_id: &str) -> Result<(), SyncError>;
}

pub struct RestHistory {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl RestHistory {
    /// # Errors
    ///
    /// Returns a connectivity error when `api_url` is not an absolute URL.
    pub fn new(client: reqwest::Client, api_url: &str) -> Result<Self, SyncError> {
        let base = reqwest::Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| ConnectivityError::Http(format!("invalid api url {api_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConnectivityError::Http(format!("invalid api url {api_url}")).into());
        }
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn page_url(&self, room_id: &str, page: PageRequest) -> reqwest::Url {
        let mut url = self.url(&["rooms", room_id, "messages"]);
        url.query_pairs_mut()
            .append_pair("offset", &page.offset.to_string())
            .append_pair("limit", &page.limit.to_string());
        url
    }

    pub(crate) fn message_url(&self, message_id: &str) -> reqwest::Url {
        self.url(&["messages", message_id])
    }
}

#[async_trait::async_trait]
impl HistoryApi for RestHistory {
    async fn fetch_page(&self, room_id: &str, page: PageRequest) -> Result<Vec<Message>, SyncError> {
        let url = self.page_url(room_id, page);
        debug!(room_id, offset = page.offset, limit = page.limit, "history: fetching page");
        let body: Value = self.client.get(url).send().await?.error_for_status()?.json().await?;
        parse_page(room_id, body)
    }

    async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), SyncError> {
        self.client
            .patch(self.message_url(message_id))
            .json(&json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), SyncError> {
        self.client
            .delete(self.message_url(message_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Accept a bare array or `{"messages": [...]}`; rows may omit `room_id`.
pub(crate) fn parse_page(room_id: &str, body: Value) -> Result<Vec<Message>, SyncError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("messages") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(SyncError::Parse("history: expected `messages` array".to_owned())),
        },
        _ => return Err(SyncError::Parse("history: expected array of messages".to_owned())),
    };

    rows.into_iter()
        .map(|mut row| {
            if let Some(obj) = row.as_object_mut() {
                obj.entry("room_id").or_insert_with(|| Value::String(room_id.to_owned()));
            }
            serde_json::from_value(row).map_err(SyncError::from)
        })
        .collect()
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
