use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use globset::Glob;
use tracing::debug;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::SptError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFormat {
    TarGz,
    Zip,
    Other(String),
}

impl ResourceFormat {
    pub fn extension(&self) -> &str {
        match self {
            ResourceFormat::TarGz => "tar.gz",
            ResourceFormat::Zip => "zip",
            ResourceFormat::Other(value) => value,
        }
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ResourceFormat {
    type Err = SptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "tar.gz" => ResourceFormat::TarGz,
            "zip" => ResourceFormat::Zip,
            _ => ResourceFormat::Other(normalized),
        })
    }
}

pub fn archive_path(dir: &Path, resource_name: &str) -> PathBuf {
    dir.join(format!("{resource_name}.tar.gz"))
}

pub fn make_tarfile(
    source: &Path,
    output_dir: &Path,
    resource_name: &str,
) -> Result<PathBuf, SptError> {
    let output = archive_path(output_dir, resource_name);
    if output.exists() {
        return Ok(output);
    }
    write_tar_gz(&output, &[source.to_path_buf()])?;
    Ok(output)
}

pub fn make_directory_tarfile(
    directory: &Path,
    pattern: &str,
    resource_name: &str,
) -> Result<PathBuf, SptError> {
    let output = archive_path(parent_dir(directory), resource_name);
    if output.exists() {
        return Ok(output);
    }
    let members = matching_entries(directory, pattern)?;
    write_tar_gz(&output, &members)?;
    Ok(output)
}

pub fn matching_entries(directory: &Path, pattern: &str) -> Result<Vec<PathBuf>, SptError> {
    let matcher = Glob::new(pattern)
        .map_err(|err| SptError::InvalidPattern(format!("{pattern}: {err}")))?
        .compile_matcher();
    let entries = fs::read_dir(directory).map_err(|err| {
        SptError::Filesystem(format!("read dir {}: {err}", directory.display()))
    })?;
    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SptError::Filesystem(err.to_string()))?;
        if matcher.is_match(entry.file_name()) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches)
}

fn write_tar_gz(output: &Path, members: &[PathBuf]) -> Result<(), SptError> {
    let file = File::create(output)
        .map_err(|err| SptError::Filesystem(format!("create {}: {err}", output.display())))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for member in members {
        let arcname = member
            .file_name()
            .ok_or_else(|| SptError::Filesystem(format!("no file name: {}", member.display())))?;
        let result = if member.is_dir() {
            builder.append_dir_all(arcname, member)
        } else {
            builder.append_path_with_name(member, arcname)
        };
        result.map_err(|err| SptError::Filesystem(format!("tar {}: {err}", member.display())))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|err| SptError::Filesystem(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| SptError::Filesystem(err.to_string()))?;
    debug!(archive = %output.display(), members = members.len(), "archive written");
    Ok(())
}

pub fn extract_archive(
    archive: &Path,
    format: &ResourceFormat,
    target_dir: &Path,
) -> Result<(), SptError> {
    match format {
        ResourceFormat::TarGz => extract_tar_gz(archive, target_dir),
        ResourceFormat::Zip => extract_zip(archive, target_dir),
        ResourceFormat::Other(other) => Err(SptError::UnsupportedFormat(other.clone())),
    }
}

pub fn extract_tar_gz(archive: &Path, target_dir: &Path) -> Result<(), SptError> {
    let mut reader = open_tar_gz(archive)?;
    let entries = reader
        .entries()
        .map_err(|err| SptError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| SptError::Filesystem(err.to_string()))?;
        let path = entry
            .path()
            .map_err(|err| SptError::Filesystem(err.to_string()))?
            .into_owned();
        if !is_enclosed(&path) {
            return Err(SptError::PathTraversal(path.display().to_string()));
        }
        if entry.header().entry_type().is_symlink() || entry.header().entry_type().is_hard_link()
        {
            let link = entry
                .link_name()
                .map_err(|err| SptError::Filesystem(err.to_string()))?
                .map(|link| link.into_owned())
                .unwrap_or_default();
            let resolved = path.parent().unwrap_or(Path::new("")).join(&link);
            if !is_enclosed(&resolved) {
                return Err(SptError::PathTraversal(format!(
                    "{} -> {}",
                    path.display(),
                    link.display()
                )));
            }
        }
    }

    fs::create_dir_all(target_dir).map_err(|err| SptError::Filesystem(err.to_string()))?;
    let mut reader = open_tar_gz(archive)?;
    reader
        .unpack(target_dir)
        .map_err(|err| SptError::Filesystem(format!("unpack {}: {err}", archive.display())))
}

fn open_tar_gz(archive: &Path) -> Result<tar::Archive<GzDecoder<File>>, SptError> {
    let file = File::open(archive)
        .map_err(|err| SptError::Filesystem(format!("open tar {}: {err}", archive.display())))?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), SptError> {
    let file = File::open(zip_path)
        .map_err(|err| SptError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| SptError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| SptError::Filesystem(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(SptError::PathTraversal(entry.name().to_string()));
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| SptError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(SptError::PathTraversal(entry.name().to_string())),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| SptError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| SptError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            File::create(&entry_path).map_err(|err| SptError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| SptError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn zip_files(files: &[PathBuf]) -> Result<Vec<u8>, SptError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for path in files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SptError::Filesystem(format!("invalid file name: {}", path.display())))?;
        let content = fs::read(path)
            .map_err(|err| SptError::Filesystem(format!("read {}: {err}", path.display())))?;
        writer
            .start_file(name, options)
            .map_err(|err| SptError::Filesystem(err.to_string()))?;
        writer
            .write_all(&content)
            .map_err(|err| SptError::Filesystem(err.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|err| SptError::Filesystem(err.to_string()))?;
    Ok(cursor.into_inner())
}

fn is_enclosed(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

pub fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosed_paths() {
        assert!(is_enclosed(Path::new("a/b/c.nc")));
        assert!(is_enclosed(Path::new("./a/../b")));
        assert!(!is_enclosed(Path::new("../../evil")));
        assert!(!is_enclosed(Path::new("a/../../evil")));
        assert!(!is_enclosed(Path::new("/etc/passwd")));
    }

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!("TAR.GZ".parse::<ResourceFormat>().unwrap(), ResourceFormat::TarGz);
        assert_eq!("zip".parse::<ResourceFormat>().unwrap(), ResourceFormat::Zip);
        assert_eq!(
            "nc".parse::<ResourceFormat>().unwrap(),
            ResourceFormat::Other("nc".to_string())
        );
    }
}
