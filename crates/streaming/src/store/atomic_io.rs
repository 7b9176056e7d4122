use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes `text` next to `path` first and renames it into place, so a reader
/// never observes a half-written tile blob.
pub(crate) fn write_blob_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path_for(path);
    fs::write(&partial, text.as_bytes())?;
    if let Err(error) = swap_into_place(&partial, path) {
        let _ = fs::remove_file(&partial);
        return Err(error);
    }
    Ok(())
}

/// Reads a blob, mapping a missing file to `Ok(None)`.
pub(crate) fn read_blob(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

fn swap_into_place(partial: &Path, final_path: &Path) -> io::Result<()> {
    // rename() does not replace an existing file on every platform.
    match fs::remove_file(final_path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    fs::rename(partial, final_path)
}

fn partial_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("blob");
    let partial_name = format!(".{file_name}.partial");
    match path.parent() {
        Some(parent) => parent.join(partial_name),
        None => PathBuf::from(partial_name),
    }
}
