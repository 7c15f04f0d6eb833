//! Newtype identifiers for the entities the store and registry hand out.
//!
//! Ids are server-minted monotonic integers. Wrapping them keeps a batch id
//! from being passed where a key id is expected; `Deref` keeps the call sites
//! light where the raw integer is genuinely wanted (SQL binds, formatting).

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                $name(raw)
            }
        }

        impl std::ops::Deref for $name {
            type Target = i64;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a benchmark client in the process-wide registry.
    ClientId
);
id_type!(
    /// Identity of a persisted benchmark key.
    KeyId
);
id_type!(
    /// Identity of a batch of requests made together.
    BatchRequestId
);
id_type!(
    /// Identity of a single persisted request.
    RequestId
);
id_type!(
    /// Identity of a single persisted response.
    ResponseId
);
