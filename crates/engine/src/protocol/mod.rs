// VTrace - JavaScript Value Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Inspector wire protocol messages.
//!
//! The debuggee speaks JSON text frames over a websocket. Outbound frames are
//! always requests; inbound frames are either responses (they carry the id of
//! the request they answer) or notifications (a method and parameters, no id).
//!
//! # Protocol Types
//!
//! - [`Request`] - Outgoing call with a unique id, a method and optional parameters
//! - [`Response`] - Answer to one request, carrying a result or an error
//! - [`Notification`] - Asynchronous event emitted by the debuggee
//! - [`InboundMessage`] - Discriminated union of the two inbound kinds
//!
//! Typed payloads of the methods and events the engine uses live in [`cdp`].

pub mod cdp;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Request/response identifier. Assigned by the transport, strictly increasing from 1.
pub type RequestId = u64;

/// Outgoing inspector request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Unique positive identifier used to correlate the response
    pub id: RequestId,
    /// Method name, e.g. `Debugger.enable`
    pub method: String,
    /// Method parameters, omitted when the method takes none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { id, method: method.into(), params }
    }
}

/// Error object the debuggee attaches to a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolErrorBody {
    /// Numeric error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Answer to a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request this answers
    pub id: RequestId,
    /// Result payload (absent on error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (absent on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolErrorBody>,
}

impl Response {
    /// Split the response into its result or its error.
    ///
    /// Methods without a return value answer with `{}` or with no `result`
    /// at all; both become an empty object.
    pub fn into_result(self) -> Result<Value, ProtocolErrorBody> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or_else(|| Value::Object(Default::default()))),
        }
    }
}

/// Asynchronous event emitted by the debuggee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event name, e.g. `Debugger.paused`
    pub method: String,
    /// Event payload
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Deserialize the event parameters into a typed payload.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.params)
    }
}

/// An inbound frame that could not be classified.
#[derive(Debug, Clone, Error)]
#[error("malformed inbound frame: {reason}")]
pub struct MalformedFrame {
    /// Why the frame was rejected
    pub reason: String,
}

/// Any frame received from the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Answer to one of our requests
    Response(Response),
    /// Asynchronous event
    Notification(Notification),
}

/// Loose shape used to classify inbound frames before committing to a variant.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProtocolErrorBody>,
}

impl InboundMessage {
    /// Parse and classify one text frame.
    ///
    /// A frame carrying an `id` is a response; otherwise a frame carrying a
    /// `method` is a notification; anything else is malformed.
    pub fn parse(text: &str) -> Result<Self, MalformedFrame> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| MalformedFrame { reason: e.to_string() })?;

        match (raw.id, raw.method) {
            (Some(id), _) => {
                let id = id.as_u64().ok_or_else(|| MalformedFrame {
                    reason: format!("response id {id} is not a non-negative integer"),
                })?;
                Ok(Self::Response(Response { id, result: raw.result, error: raw.error }))
            }
            (None, Some(method)) => Ok(Self::Notification(Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            })),
            (None, None) => {
                Err(MalformedFrame { reason: "frame has neither an id nor a method".into() })
            }
        }
    }

    /// Method name, for notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }

    /// Request id, for responses.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Response(response) => Some(response.id),
            Self::Notification(_) => None,
        }
    }

    /// The notification, if this is one.
    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            Self::Notification(notification) => Some(notification),
            Self::Response(_) => None,
        }
    }

    /// Consume into the notification, if this is one.
    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Self::Notification(notification) => Some(notification),
            Self::Response(_) => None,
        }
    }
}
