use std::{fs::File, io, path::Path};

/// The source is only removed once the destination is in place with the same length.
pub fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    let expected_len = std::fs::metadata(source)?.len();

    match std::fs::hard_link(source, destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Err(err),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(err),
        Err(err) => {
            tracing::debug!(
                "hard link {} -> {} failed ({}), copying instead",
                source.display(),
                destination.display(),
                err
            );
            copy_no_clobber(source, destination)?;
        }
    }

    let actual_len = std::fs::metadata(destination)?.len();
    if actual_len != expected_len {
        let _ = std::fs::remove_file(destination);
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "destination {} has {} bytes, expected {}",
                destination.display(),
                actual_len,
                expected_len
            ),
        ));
    }

    if let Err(err) = std::fs::remove_file(source) {
        // keep exactly one copy: the untouched source
        let _ = std::fs::remove_file(destination);
        return Err(err);
    }

    Ok(())
}

fn copy_no_clobber(source: &Path, destination: &Path) -> io::Result<()> {
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".musicorg-")
        .suffix(".part")
        .tempfile_in(parent)?;
    let mut input = File::open(source)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file()
        .set_permissions(input.metadata()?.permissions())?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(destination).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn relocate_moves_the_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.flac");
        let destination = dir.path().join("out.flac");
        fs::write(&source, b"audio").unwrap();

        relocate(&source, &destination).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"audio");
    }

    #[test]
    fn relocate_never_overwrites() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.flac");
        let destination = dir.path().join("out.flac");
        fs::write(&source, b"new").unwrap();
        fs::write(&destination, b"old").unwrap();

        let err = relocate(&source, &destination).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&source).unwrap(), b"new");
        assert_eq!(fs::read(&destination).unwrap(), b"old");
    }

    #[test]
    fn relocate_missing_destination_dir_keeps_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.flac");
        fs::write(&source, b"audio").unwrap();

        assert!(relocate(&source, &dir.path().join("missing/out.flac")).is_err());
        assert_eq!(fs::read(&source).unwrap(), b"audio");
    }

    #[test]
    fn copy_no_clobber_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.flac");
        let destination = dir.path().join("out.flac");
        fs::write(&source, b"new").unwrap();
        fs::write(&destination, b"old").unwrap();

        assert!(copy_no_clobber(&source, &destination).is_err());
        assert_eq!(fs::read(&destination).unwrap(), b"old");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn copy_no_clobber_keeps_source_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.flac");
        let destination = dir.path().join("out.flac");
        fs::write(&source, b"audio").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();

        copy_no_clobber(&source, &destination).unwrap();
        let mode = fs::metadata(&destination).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        assert_eq!(fs::read(&destination).unwrap(), b"audio");
    }
}
