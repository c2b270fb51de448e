//! Typed broker names.
//!
//! Names are opaque String wrappers (serde-transparent). Stream and subject
//! names are derived from a [`Channel`](crate::Channel); consumer names are
//! generated per read.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_name!(
    /// Name of a durable stream.
    StreamName
);
typed_name!(
    /// Transport subject a message is published to.
    SubjectName
);
typed_name!(
    /// Name of a disposable read consumer.
    ConsumerName
);

impl ConsumerName {
    /// Default prefix for ephemeral read consumers.
    pub const READER_PREFIX: &'static str = "reader";

    /// Generate a unique consumer name: `<prefix>-<unix millis>-<random>`.
    ///
    /// The millisecond stamp orders names by creation time; the random
    /// suffix keeps reads started within the same millisecond apart.
    pub fn generate(prefix: &str) -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}-{millis}-{}", &suffix[..8]))
    }
}
