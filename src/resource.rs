use base64::Engine;
use futures_util::future::BoxFuture;
use std::io;

/// Fetches the raw bytes behind an image location.
pub trait ResourceLoader: Send + Sync {
    fn load<'a>(&'a self, location: &'a str) -> BoxFuture<'a, io::Result<Vec<u8>>>;
}

/// Loads `data:` URIs inline and everything else from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResourceLoader;

impl ResourceLoader for FileResourceLoader {
    fn load<'a>(&'a self, location: &'a str) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(futures_util::future::ready(load_location(location)))
    }
}

pub(crate) fn load_location(location: &str) -> io::Result<Vec<u8>> {
    if location.starts_with("data:") {
        return decode_data_uri(location);
    }
    std::fs::read(location)
}

fn decode_data_uri(uri: &str) -> io::Result<Vec<u8>> {
    let Some((header, data)) = uri.split_once(',') else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "data URI without payload",
        ));
    };
    if header.contains("base64") {
        return base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
    }
    Ok(data.as_bytes().to_vec())
}
