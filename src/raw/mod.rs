/// Image decoding and the reference corrector
///
/// This module handles:
/// - Decoding RAW and ordinary images to linear RGB (loader.rs)
/// - Small samples from embedded JPEGs (thumbnail.rs)
/// - Superseding background previews (preview.rs)
/// - Correcting and encoding batch outputs (processor.rs)

pub mod loader;
pub mod preview;
pub mod processor;
pub mod thumbnail;
