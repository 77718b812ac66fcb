//! ASF (WMV/WMA) carried in WMSP frames, as served by Windows Media encoders.

/// WMSP framing and the MMS data packet inside it
pub mod frame;

/// ASF header objects
pub mod objects;

/// Content reader and its factory
pub mod reader;

pub use frame::{FrameType, WmspFrame};
pub use objects::AsfHeader;
pub use reader::{ASFContentReader, ASFContentReaderFactory};
