pub mod enums;
pub mod exam;
pub mod payload;
pub mod queue;
pub mod reading;

pub use enums::*;
pub use exam::*;
pub use payload::*;
pub use queue::*;
pub use reading::*;
