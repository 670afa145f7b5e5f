//! Request/response envelope helpers
//!
//! Clients that want to match replies to requests wrap their args as
//! `{"id": ..., "args": ...}`; replies echo the id back around the [`Response`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::connection::ConnectionRef;

/// Args wrapper carrying a request identity
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ArgsRequest<T> {
    #[serde(default)]
    pub id: String,
    pub args: T,
}

/// Reply body
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Response {
    pub result: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(data: impl Into<Option<Value>>) -> Self {
        Self {
            result: true,
            message: "ok".to_string(),
            data: data.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            result: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Serialize)]
struct ArgsResponse<'a> {
    id: &'a str,
    args: &'a Response,
}

/// Emits a [`Response`] on a fixed event to one connection
pub struct Responder {
    connection: ConnectionRef,
    event: String,
    identity: String,
}

impl Responder {
    pub fn new(connection: ConnectionRef, event: impl Into<String>) -> Self {
        Self {
            connection,
            event: event.into(),
            identity: String::new(),
        }
    }

    /// Wrap replies as `{"id": identity, "args": response}`
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn success(&self, data: impl Into<Option<Value>>) {
        self.emit(&Response::success(data));
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.emit(&Response::fail(message));
    }

    pub fn emit(&self, response: &Response) {
        if self.identity.is_empty() {
            self.connection.emit(&self.event, response, "");
        } else {
            let wrapped = ArgsResponse {
                id: &self.identity,
                args: response,
            };
            self.connection.emit(&self.event, &wrapped, "");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::acceptor::{Acceptor, AcceptorConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_plain_response() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let (conn, mut rx) = acceptor.accept("127.0.0.1:8100".parse().unwrap());

        Responder::new(conn.clone(), "login").fail("bad password");
        let frame = rx.recv().await.unwrap();
        assert_eq!(
            &frame[..],
            br#"["login",{"result":false,"message":"bad password"}]"#
        );
    }

    #[tokio::test]
    async fn test_response_with_identity() {
        let acceptor = Acceptor::new(AcceptorConfig::default());
        let (conn, mut rx) = acceptor.accept("127.0.0.1:8101".parse().unwrap());

        Responder::new(conn, "lookup")
            .with_identity("q7")
            .success(json!({"count": 3}));
        let frame = rx.recv().await.unwrap();
        assert_eq!(
            &frame[..],
            br#"["lookup",{"id":"q7","args":{"result":true,"message":"ok","data":{"count":3}}}]"#
        );
    }

    #[test]
    fn test_args_request_parses() {
        let req: ArgsRequest<Vec<i32>> = serde_json::from_str(r#"{"id":"a","args":[1,2]}"#).unwrap();
        assert_eq!(req.id, "a");
        assert_eq!(req.args, vec![1, 2]);
    }
}
