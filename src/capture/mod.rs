pub mod frame;
pub mod reader;
pub mod sim;
pub mod source;

pub use frame::{FrameBuffer, FrameImage, FrameSize};
pub use reader::FrameReader;
pub use sim::{SimProbe, SimulatedSource};
pub use source::FrameSource;
