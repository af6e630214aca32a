//! Secret censoring for logs and artifacts.
//!
//! Every occurrence of a secret is overwritten with `*` of the same length,
//! so censored files keep their size. Files are processed as a stream of
//! fixed-size buffers and never loaded whole.

use crate::metrics_defs::{FILES_CENSORED, SECRETS_CENSORED};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use shared::counter;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

const MASK: u8 = b'*';

#[derive(thiserror::Error, Debug)]
pub enum CensorError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),
    #[error("could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CensorError + '_ {
    move |source| CensorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

#[derive(Clone, Debug, Default)]
pub struct Censorer {
    /// Longest first, so a secret containing another is masked whole
    secrets: Vec<Vec<u8>>,
}

impl Censorer {
    /// Each secret is censored as given, trimmed of surrounding whitespace,
    /// and base64 encoded. Secrets that are only whitespace are ignored.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut variants: Vec<Vec<u8>> = Vec::new();
        for secret in secrets {
            let raw = secret.as_ref();
            let trimmed = raw.trim_ascii();
            // A blank secret would mask every newline or space
            if trimmed.is_empty() {
                continue;
            }
            for variant in [
                raw.to_vec(),
                trimmed.to_vec(),
                STANDARD.encode(trimmed).into_bytes(),
            ] {
                if !variant.is_empty() && !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
        }
        variants.sort_by(|a, b| b.len().cmp(&a.len()));

        Censorer { secrets: variants }
    }

    /// Loads every file under `directories` as one secret. Entries whose name
    /// starts with `.` are skipped, which also skips the `..data` indirection
    /// of mounted Kubernetes secrets while still reading through its links.
    pub fn from_directories(directories: &[PathBuf]) -> Result<Self, CensorError> {
        let mut secrets = Vec::new();

        for directory in directories {
            let walker = WalkDir::new(directory)
                .follow_links(true)
                .into_iter()
                .filter_entry(|entry| !is_hidden(entry));

            for entry in walker {
                let entry = entry.map_err(|source| CensorError::Walk {
                    path: directory.clone(),
                    source,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                secrets.push(fs::read(entry.path()).map_err(io_error(entry.path()))?);
            }
        }

        tracing::debug!(count = secrets.len(), "loaded secrets to censor");
        Ok(Self::new(secrets))
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    fn longest(&self) -> usize {
        self.secrets.first().map(Vec::len).unwrap_or(0)
    }

    /// Masks every secret occurrence that starts before `start_limit`.
    fn censor_prefix(&self, data: &mut [u8], start_limit: usize) -> usize {
        let mut count = 0;

        for secret in &self.secrets {
            if secret.len() > data.len() {
                continue;
            }
            let last_start = (data.len() - secret.len() + 1).min(start_limit);
            let mut i = 0;
            while i < last_start {
                if data[i..i + secret.len()] == secret[..] {
                    data[i..i + secret.len()].fill(MASK);
                    count += 1;
                    i += secret.len();
                } else {
                    i += 1;
                }
            }
        }

        count
    }

    /// Masks secrets in place and returns how many were found.
    pub fn censor(&self, data: &mut [u8]) -> usize {
        self.censor_prefix(data, data.len())
    }

    /// Copies `reader` to `writer` with secrets masked, reading `buffer_size`
    /// bytes at a time.
    ///
    /// The last `longest secret - 1` bytes of each round are held back and
    /// searched again with the next buffer, so a secret split across two
    /// reads is still found.
    pub fn censor_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        buffer_size: usize,
    ) -> Result<usize, CensorError> {
        let carry = self.longest().saturating_sub(1);
        let mut buffer = vec![0; buffer_size.max(1)];
        let mut window: Vec<u8> = Vec::with_capacity(carry + buffer.len());
        let mut count = 0;

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            window.extend_from_slice(&buffer[..read]);

            if window.len() > carry {
                // Any secret starting before this point lies wholly in the window
                let flush = window.len() - carry;
                count += self.censor_prefix(&mut window, flush);
                writer.write_all(&window[..flush])?;
                window.drain(..flush);
            }
        }

        count += self.censor(&mut window);
        writer.write_all(&window)?;
        writer.flush()?;

        Ok(count)
    }

    /// Censors a file by streaming it into a temporary file next to it and
    /// renaming that over the original.
    pub fn censor_file(&self, path: &Path, buffer_size: usize) -> Result<usize, CensorError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let input = File::open(path).map_err(io_error(path))?;
        let permissions = input.metadata().map_err(io_error(path))?.permissions();
        let temp = NamedTempFile::new_in(parent).map_err(io_error(parent))?;

        let count = self.censor_stream(input, BufWriter::new(temp.as_file()), buffer_size)?;

        fs::set_permissions(temp.path(), permissions).map_err(io_error(temp.path()))?;
        temp.persist(path).map_err(|source| CensorError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

        counter!(FILES_CENSORED).increment(1);
        if count > 0 {
            counter!(SECRETS_CENSORED).increment(count as u64);
            tracing::info!(path = %path.display(), count, "censored secrets");
        }
        Ok(count)
    }

    /// Censors `path` if it is a file, or every file beneath it if it is a
    /// directory.
    pub fn censor_path(&self, path: &Path, buffer_size: usize) -> Result<usize, CensorError> {
        let mut count = 0;

        for entry in WalkDir::new(path) {
            let entry = entry.map_err(|source| CensorError::Walk {
                path: path.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() {
                count += self.censor_file(entry.path(), buffer_size)?;
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn censored(censorer: &Censorer, input: &str) -> String {
        let mut data = input.as_bytes().to_vec();
        censorer.censor(&mut data);
        String::from_utf8(data).unwrap()
    }

    fn streamed(censorer: &Censorer, input: &str, buffer_size: usize) -> String {
        let mut output = Vec::new();
        censorer
            .censor_stream(input.as_bytes(), &mut output, buffer_size)
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_censor_in_place() {
        let censorer = Censorer::new(["hunter2"]);
        assert_eq!(
            censored(&censorer, "password=hunter2 again hunter2"),
            "password=******* again *******"
        );
        assert_eq!(censored(&censorer, "nothing here"), "nothing here");
    }

    #[test]
    fn test_trimmed_and_base64_variants() {
        let censorer = Censorer::new(["  token\n"]);
        assert_eq!(censored(&censorer, "a token b"), "a ***** b");

        let encoded = STANDARD.encode("token");
        assert_eq!(
            censored(&censorer, &format!("auth: {encoded}")),
            format!("auth: {}", "*".repeat(encoded.len()))
        );
    }

    #[test]
    fn test_blank_secrets_ignored() {
        let censorer = Censorer::new(["\n", "  \t", ""]);
        assert!(censorer.is_empty());

        let secrets = tempfile::tempdir().unwrap();
        fs::write(secrets.path().join("token"), "hunter2").unwrap();
        fs::write(secrets.path().join("blank"), "\n").unwrap();
        let censorer = Censorer::from_directories(&[secrets.path().to_path_buf()]).unwrap();
        assert_eq!(
            censored(&censorer, "line one\nline two hunter2\n"),
            "line one\nline two *******\n"
        );
    }

    #[test]
    fn test_longer_secret_masked_whole() {
        let censorer = Censorer::new(["abc", "xxabcxx"]);
        assert_eq!(censored(&censorer, "-xxabcxx-abc-"), "-*******-***-");
    }

    #[test]
    fn test_stream_secret_across_buffers() {
        let censorer = Censorer::new(["secret"]);
        let input = "0123secret4567secret89";
        let expected = "0123******4567******89";

        for buffer_size in [1, 2, 3, 4, 5, 7, 64] {
            assert_eq!(streamed(&censorer, input, buffer_size), expected, "{buffer_size}");
        }
    }

    #[test]
    fn test_stream_nested_secrets_across_buffers() {
        let censorer = Censorer::new(["cd", "abcdef"]);
        for buffer_size in 1..8 {
            assert_eq!(
                streamed(&censorer, "..abcdef..cd..", buffer_size),
                "..******..**..",
                "{buffer_size}"
            );
        }
    }

    #[test]
    fn test_stream_without_secrets() {
        let censorer = Censorer::default();
        assert!(censorer.is_empty());
        assert_eq!(streamed(&censorer, "plain text", 3), "plain text");
    }

    #[test]
    fn test_censor_file_preserves_size() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("build-log.txt");
        let contents = "line one\nexport TOKEN=s3cr3t\nline three s3cr3t\n";
        fs::write(&log, contents).unwrap();

        let censorer = Censorer::new(["s3cr3t"]);
        let count = censorer.censor_file(&log, 5).unwrap();
        assert_eq!(count, 2);

        let output = fs::read_to_string(&log).unwrap();
        assert_eq!(output.len(), contents.len());
        assert_eq!(
            output,
            "line one\nexport TOKEN=******\nline three ******\n"
        );
        // No temporary files are left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_from_directories_skips_hidden() {
        let secrets = tempfile::tempdir().unwrap();
        fs::write(secrets.path().join("token"), "abc123\n").unwrap();
        fs::create_dir(secrets.path().join("nested")).unwrap();
        fs::write(secrets.path().join("nested").join("key"), "def456").unwrap();
        fs::create_dir(secrets.path().join("..data")).unwrap();
        fs::write(secrets.path().join("..data").join("ignored"), "visible").unwrap();
        fs::write(secrets.path().join(".hidden"), "visible").unwrap();

        let censorer = Censorer::from_directories(&[secrets.path().to_path_buf()]).unwrap();
        assert_eq!(
            censored(&censorer, "abc123 def456 visible"),
            "****** ****** visible"
        );
    }

    #[test]
    fn test_censor_path_walks_directories() {
        let artifacts = tempfile::tempdir().unwrap();
        fs::create_dir(artifacts.path().join("junit")).unwrap();
        fs::write(artifacts.path().join("junit").join("a.xml"), "<x>pw</x>").unwrap();
        fs::write(artifacts.path().join("b.txt"), "pw pw").unwrap();

        let censorer = Censorer::new(["pw"]);
        let count = censorer
            .censor_path(artifacts.path(), DEFAULT_BUFFER_SIZE)
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            fs::read_to_string(artifacts.path().join("b.txt")).unwrap(),
            "** **"
        );
    }
}
