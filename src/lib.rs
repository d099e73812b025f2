//! Library to backup a [Nextcloud][nc] installation running on Kubernetes.
//!
//! The Nextcloud volume is captured in maintenance mode, the MariaDB data
//! volume in MariaDB backup mode and an SQL dump is captured on its own volume.
//! All volumes are stored on [Longhorn][longhorn], which keeps the snapshots
//! and, for full backups, the backups taken from them.
//!
//! The run itself is implemented in the [`process`] module, the freeze
//! controllers in [`nextcloud`] and [`backends`].
//!
//! [nc]: https://nextcloud.com/
//! [longhorn]: https://longhorn.io/

#![forbid(unsafe_code)]

pub mod api;
pub mod backends;
pub mod cli;
pub mod nextcloud;
pub mod process;
pub mod util;
