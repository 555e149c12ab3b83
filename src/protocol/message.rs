use serde::{Deserialize, Serialize};

/// Request or reply travelling through the queue service.
///
/// `reply_to` and `correlation_id` are opaque to the pipeline and are copied
/// verbatim from a request to its reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default)]
    pub correlation_id: String,
}

impl Message {
    pub fn new(
        body: impl Into<String>,
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            reply_to: reply_to.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Build the reply to this request, carrying over its routing metadata
    pub fn reply(&self, body: impl Into<String>) -> Message {
        Message {
            body: body.into(),
            reply_to: self.reply_to.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}
