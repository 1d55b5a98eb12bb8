pub mod classification;
pub mod conversation;
pub mod tenant;
