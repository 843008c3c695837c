use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Activation error: {0}")]
    Activation(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Packet capture error: {0}")]
    Capture(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error {0}")]
    Io(io::ErrorKind),

    #[error("Timeout expired")]
    Timeout,

    #[error("Descriptor limit reached (os error {0})")]
    DescriptorLimit(i32),

    #[error("End of stream")]
    Eof,

    #[error("Handle already closed")]
    Closed,

    #[error("Unknown link type: {0}")]
    UnknownLinkType(i32),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Capture cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// 读取错误是否可以忽略并继续读取
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::DescriptorLimit(_) => true,
            Self::Io(kind) => matches!(
                kind,
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl From<pcap::Error> for CaptureError {
    fn from(err: pcap::Error) -> Self {
        match err {
            pcap::Error::IoError(e) => Self::Io(e),
            pcap::Error::TimeoutExpired => Self::Timeout,
            pcap::Error::NoMorePackets => Self::Eof,
            _ => Self::Capture(err.to_string()),
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        // EMFILE/ENFILE 没有对应的 ErrorKind
        if let Some(code @ (libc::EMFILE | libc::ENFILE)) = err.raw_os_error() {
            return CaptureError::DescriptorLimit(code);
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => CaptureError::Eof,
            kind => CaptureError::Io(kind),
        }
    }
}

impl From<serde_yaml::Error> for CaptureError {
    fn from(err: serde_yaml::Error) -> Self {
        CaptureError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::Config("invalid engine".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid engine");
        assert_eq!(CaptureError::Cancelled.to_string(), "Capture cancelled");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "try again");
        let err: CaptureError = io_err.into();
        assert!(matches!(err, CaptureError::Io(io::ErrorKind::WouldBlock)));

        let err: CaptureError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, CaptureError::Eof));

        let err: CaptureError = io::Error::from_raw_os_error(libc::EMFILE).into();
        assert!(matches!(err, CaptureError::DescriptorLimit(code) if code == libc::EMFILE));
        assert!(err.is_transient());

        let err: CaptureError = io::Error::from_raw_os_error(libc::ENFILE).into();
        assert!(err.is_transient());

        if cfg!(unix) {
            let err: CaptureError = io::Error::from_raw_os_error(libc::ECONNRESET).into();
            assert!(matches!(err, CaptureError::Io(io::ErrorKind::ConnectionReset)));
            assert!(err.is_transient());
        }

        let err: CaptureError = pcap::Error::TimeoutExpired.into();
        assert!(matches!(err, CaptureError::Timeout));

        let err: CaptureError = pcap::Error::NoMorePackets.into();
        assert!(matches!(err, CaptureError::Eof));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CaptureError::Timeout.is_transient());
        assert!(CaptureError::Io(io::ErrorKind::Interrupted).is_transient());
        assert!(CaptureError::Io(io::ErrorKind::TimedOut).is_transient());
        assert!(CaptureError::Io(io::ErrorKind::ConnectionReset).is_transient());
        assert!(CaptureError::Io(io::ErrorKind::ConnectionAborted).is_transient());

        assert!(!CaptureError::Eof.is_transient());
        assert!(!CaptureError::Closed.is_transient());
        assert!(!CaptureError::Io(io::ErrorKind::PermissionDenied).is_transient());
        assert!(!CaptureError::Capture("device went away".to_string()).is_transient());
    }
}
