use thiserror::Error;

use crate::{bits, stream};

/// Unified error type surfaced to callers. Parsing aborts on the first
/// error; partially constructed modules are discarded by the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid bitcode signature")]
    InvalidBitcodeSignature,

    #[error("invalid bitcode wrapper header")]
    InvalidBitcodeWrapperHeader,

    #[error("malformed block")]
    MalformedBlock,

    #[error("invalid multiple blocks")]
    InvalidMultipleBlocks,

    #[error("invalid record")]
    InvalidRecord,

    #[error("invalid value")]
    InvalidValue,

    #[error("invalid type")]
    InvalidType,

    #[error("invalid type for value")]
    InvalidTypeForValue,

    #[error("invalid TYPE table")]
    InvalidTypeTable,

    #[error("invalid ID")]
    InvalidId,

    #[error("invalid constant reference")]
    InvalidConstantReference,

    #[error("invalid instruction with no basic block")]
    InvalidInstructionWithNoBB,

    #[error("expected a constant")]
    ExpectedConstant,

    #[error("conflicting METADATA_KIND records")]
    ConflictingMetadataKindRecords,

    #[error("insufficient function protos")]
    InsufficientFunctionProtos,

    #[error("never resolved value found in function")]
    NeverResolvedValueFoundInFunction,

    #[error("malformed global initializer set")]
    MalformedGlobalInitializerSet,

    #[error("could not find function in stream")]
    CouldNotFindFunctionInStream,

    #[error(transparent)]
    Bits(#[from] bits::BitsError),

    #[error(transparent)]
    Stream(#[from] stream::StreamError),
}
