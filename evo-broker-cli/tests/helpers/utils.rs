use std::io::Write;
use std::net::TcpListener;
use tempfile::NamedTempFile;

/// Returns an address which nobody listens on.
pub fn get_free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();

    listener.local_addr().unwrap().to_string()
}

/// Writes config into a temporary file which lives as long as returned handle.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();

    file
}

/// Returns path of a temporary file.
pub fn get_path(file: &NamedTempFile) -> String {
    file.path().to_str().unwrap().to_string()
}
