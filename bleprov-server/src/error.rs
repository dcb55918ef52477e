//! Error types

/// Failures talking to the Bluetooth controller
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("failed to open HCI socket: {0}")]
    Open(#[source] std::io::Error),

    #[error("failed to bind hci{index}: {source}")]
    Bind {
        index: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set HCI filter: {0}")]
    Filter(#[source] std::io::Error),

    #[error("failed to send HCI command 0x{opcode:04x}: {source}")]
    Write {
        opcode: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("no command complete for HCI command 0x{0:04x}")]
    Timeout(u16),

    #[error("HCI command 0x{opcode:04x} failed with status 0x{status:02x}")]
    Status { opcode: u16, status: u8 },
}

/// Failures on the ATT listening channel
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("failed to create L2CAP socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to bind L2CAP ATT channel: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to set security level: {0}")]
    Security(#[source] std::io::Error),

    #[error("failed to listen: {0}")]
    Listen(#[source] std::io::Error),

    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// The attribute table could not be built
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("attribute handle space exhausted")]
    HandlesExhausted,

    #[error("attribute value too long for {0}")]
    ValueTooLong(&'static str),
}

/// An external tool could not be run
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors that end the process with a non-zero status
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Listen(#[from] ListenError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}
