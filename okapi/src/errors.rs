/// Errors produced by the OKVS core and the private set intersection driver.
#[derive(Debug)]
pub enum Error {
    /// The dense core was singular for the current seed; the caller should
    /// roll the seed and retry.
    EncodeRetry,
    /// A bin exceeded its derived capacity bound. This indicates a parameter
    /// bug and is fatal.
    BinOverflow {
        /// The offending bin.
        bin: usize,
        /// The number of items routed to the bin.
        size: usize,
        /// The capacity bound the bin exceeded.
        bound: usize,
    },
    /// Duplicate inputs, mismatched lengths, or otherwise ill-formed caller
    /// input.
    MalformedInput(String),
    /// The peer deviated from the protocol (short mask buffer, failed
    /// consistency check).
    ProtocolAbort(String),
    /// An input/output error occurred.
    IoError(std::io::Error),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(e: std::io::Error) -> Error {
        Error::IoError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::EncodeRetry => "singular dense core; retry with a fresh seed".fmt(f),
            Error::BinOverflow { bin, size, bound } => write!(
                f,
                "bin {} holds {} items, exceeding its bound of {}",
                bin, size, bound
            ),
            Error::MalformedInput(s) => write!(f, "malformed input: {}", s),
            Error::ProtocolAbort(s) => write!(f, "protocol abort: {}", s),
            Error::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}
