/// Zero-copy byte reader for decoding BACnet frames.
pub mod reader;
/// Byte writer for encoding BACnet frames into a caller-owned buffer.
pub mod writer;
