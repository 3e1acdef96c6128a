//! Transfer Client Adapter
//!
//! Login, directory navigation, listing and directory upload against a
//! remote file-transfer endpoint:
//! - `TransferConnector`/`TransferClient`: the interface the pipeline drives
//! - `FtpConnector`/`FtpClient`: plain FTP over tokio TCP (passive mode)

pub mod client;
pub mod error;
pub mod ftp;

pub use client::{Endpoint, ProgressCallback, TransferClient, TransferConnector, TransferProgress};
pub use error::{TransferError, TransferResult};
pub use ftp::{FtpClient, FtpConnector};
