#![forbid(unsafe_code)]

pub mod pcd;

pub use pcd::{decode_pcd, encode_pcd, read_pcd, write_pcd, write_pcd_binary, DataFormat};
