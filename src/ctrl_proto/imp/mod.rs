mod strip_bank;
pub use strip_bank::{FocusStrip, StripBank, StripBank8, StripDisplay};
