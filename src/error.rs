//! Status codes shared by every operation in the stack.

/// Wire-independent status of a card operation.
///
/// Host implementations report transport failures through the same set, so
/// a caller sees one taxonomy regardless of the slot being native SD/MMC
/// or SPI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The card or host does not support the requested operation or mode
    NotSupported,
    /// A response was received but failed validation
    InvalidResponse,
    /// The card did not answer within the allotted time
    Timeout,
    /// A bounded internal buffer is too small for the request
    NoMem,
    /// Address or length is outside the card's capacity or granularity
    InvalidSize,
    /// No card is attached to the slot
    NoCard,
    /// Malformed argument
    InvalidArg,
    /// The card is busy with a previous operation
    Busy,
}

pub type Result<T> = core::result::Result<T, Error>;
