//! AppImage format detection and read-only access to the embedded filesystem.
//!
//! ```no_run
//! use appimage_reader::{ArchiveReader, Container, ContainerOptions};
//!
//! let app = Container::open("Demo.AppImage".as_ref(), &ContainerOptions::default())?;
//! println!("{} {} ({})", app.name(), app.version(), app.kind().as_str());
//! let icon = app.reader()?.read_to_vec(".DirIcon")?;
//! # Ok::<(), appimage_reader::Error>(())
//! ```

pub mod archive;
mod container;
pub mod descriptor;
pub mod detect;
pub mod elf;
mod error;
pub mod wildcard;

pub use archive::{ArchiveReader, Backend, BackendOptions};
pub use container::{Container, ContainerOptions};
pub use descriptor::{Descriptor, DescriptorOptions};
pub use detect::{ContainerKind, Detection, PayloadFormat};
pub use error::{Error, Result};
