pub mod credentials;
pub mod descriptor;
pub mod format_tag;

pub use credentials::{Cookie, Credentials};
pub use descriptor::{MediaDescriptor, MediaDescriptorBuilder, Thumbnails};
pub use format_tag::FormatTag;
