pub mod timeline;
pub mod video;
