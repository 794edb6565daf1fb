//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding lookup table.

use connector_core::outcome::ConnectorState;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Connector connectivity state (`connector_states` table).
    ConnectorStateId {
        Disconnected = 1,
        Connected = 2,
        Error = 3,
    }
}

impl From<ConnectorState> for ConnectorStateId {
    fn from(state: ConnectorState) -> Self {
        match state {
            ConnectorState::Disconnected => Self::Disconnected,
            ConnectorState::Connected => Self::Connected,
            ConnectorState::Error => Self::Error,
        }
    }
}

impl From<ConnectorStateId> for ConnectorState {
    fn from(id: ConnectorStateId) -> Self {
        match id {
            ConnectorStateId::Disconnected => Self::Disconnected,
            ConnectorStateId::Connected => Self::Connected,
            ConnectorStateId::Error => Self::Error,
        }
    }
}
