use super::StructuralParseError;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use prost_reflect::{
    DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
};
use std::{fmt, time::Duration};

/// A single request message, either as a JSON record or as an already built message.
#[derive(Debug, Clone)]
pub enum RequestMessage {
    /// A JSON object converted field by field into the input schema. `null` is the empty message.
    Record(serde_json::Value),
    /// A message of the input type. It may come from any descriptor pool that defines the type.
    Message(DynamicMessage),
}

impl RequestMessage {
    /// Converts this request into a message of the given schema.
    ///
    /// Fails on any field absent from the schema and on values of the wrong type.
    pub fn into_message(
        self,
        descriptor: &MessageDescriptor,
    ) -> Result<DynamicMessage, StructuralParseError> {
        match self {
            RequestMessage::Record(serde_json::Value::Null) => {
                Ok(DynamicMessage::new(descriptor.clone()))
            }
            RequestMessage::Record(value) => DynamicMessage::deserialize_with_options(
                descriptor.clone(),
                value,
                &DeserializeOptions::new(),
            )
            .map_err(|source| StructuralParseError::Mismatch {
                message_type: descriptor.full_name().to_string(),
                source,
            }),
            RequestMessage::Message(message) if message.descriptor() == *descriptor => {
                Ok(message)
            }
            RequestMessage::Message(message)
                if message.descriptor().full_name() == descriptor.full_name() =>
            {
                // Same type from another pool snapshot: rebind it to the method's schema.
                let mut rebound = DynamicMessage::new(descriptor.clone());
                rebound
                    .transcode_from(&message)
                    .map_err(|source| StructuralParseError::Transcode {
                        message_type: descriptor.full_name().to_string(),
                        source,
                    })?;
                Ok(rebound)
            }
            RequestMessage::Message(message) => Err(StructuralParseError::WrongMessageType {
                expected: descriptor.full_name().to_string(),
                actual: message.descriptor().full_name().to_string(),
            }),
        }
    }
}

impl From<serde_json::Value> for RequestMessage {
    fn from(value: serde_json::Value) -> Self {
        RequestMessage::Record(value)
    }
}

impl From<DynamicMessage> for RequestMessage {
    fn from(message: DynamicMessage) -> Self {
        RequestMessage::Message(message)
    }
}

/// The payload of a call.
///
/// - For Unary/ServerStreaming: a single [`RequestMessage`].
/// - For ClientStreaming/Bidirectional: a stream of them, pulled by the transport one element at
///   a time. A JSON array passed as [`CallInput::Unary`] is also accepted there.
pub enum CallInput {
    Unary(RequestMessage),
    Streaming(BoxStream<'static, RequestMessage>),
}

impl CallInput {
    /// Wraps a possibly unbounded stream of request messages.
    pub fn stream<St, T>(stream: St) -> Self
    where
        St: Stream<Item = T> + Send + 'static,
        T: Into<RequestMessage> + 'static,
    {
        CallInput::Streaming(stream.map(Into::into).boxed())
    }

    /// Wraps a possibly unbounded iterator of request messages. Elements are produced lazily.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Into<RequestMessage> + 'static,
    {
        Self::stream(futures_util::stream::iter(items))
    }
}

impl fmt::Debug for CallInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallInput::Unary(message) => f.debug_tuple("Unary").field(message).finish(),
            CallInput::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

impl From<serde_json::Value> for CallInput {
    fn from(value: serde_json::Value) -> Self {
        CallInput::Unary(RequestMessage::Record(value))
    }
}

impl From<DynamicMessage> for CallInput {
    fn from(message: DynamicMessage) -> Self {
        CallInput::Unary(RequestMessage::Message(message))
    }
}

impl From<Vec<serde_json::Value>> for CallInput {
    fn from(records: Vec<serde_json::Value>) -> Self {
        CallInput::iter(records)
    }
}

impl From<Vec<DynamicMessage>> for CallInput {
    fn from(messages: Vec<DynamicMessage>) -> Self {
        CallInput::iter(messages)
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Return the decoded wire messages instead of JSON records.
    pub raw_output: bool,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// Deadline for the call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn raw() -> Self {
        Self {
            raw_output: true,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A single response message.
#[derive(Debug, Clone)]
pub enum ResponseMessage {
    /// The message as a JSON object keyed by proto field names, in schema order.
    Record(serde_json::Value),
    /// The message as received, when raw output was requested.
    Raw(DynamicMessage),
}

impl ResponseMessage {
    pub(crate) fn decode(
        message: DynamicMessage,
        raw_output: bool,
    ) -> Result<Self, StructuralParseError> {
        if raw_output {
            return Ok(ResponseMessage::Raw(message));
        }

        record_from_message(&message).map(ResponseMessage::Record)
    }

    pub fn as_record(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseMessage::Record(value) => Some(value),
            ResponseMessage::Raw(_) => None,
        }
    }

    pub fn into_record(self) -> Option<serde_json::Value> {
        match self {
            ResponseMessage::Record(value) => Some(value),
            ResponseMessage::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<DynamicMessage> {
        match self {
            ResponseMessage::Raw(message) => Some(message),
            ResponseMessage::Record(_) => None,
        }
    }

    /// Returns the message as a JSON record, converting raw messages on the fly.
    pub fn to_value(&self) -> Result<serde_json::Value, StructuralParseError> {
        match self {
            ResponseMessage::Record(value) => Ok(value.clone()),
            ResponseMessage::Raw(message) => record_from_message(message),
        }
    }
}

fn record_from_message(message: &DynamicMessage) -> Result<serde_json::Value, StructuralParseError> {
    let options = SerializeOptions::new().use_proto_field_name(true);

    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|source| StructuralParseError::Unrepresentable {
            message_type: message.descriptor().full_name().to_string(),
            source,
        })
}
