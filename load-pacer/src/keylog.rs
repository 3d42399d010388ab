use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

/// Append-only TLS key log in the NSS format understood by wireshark.
/// Appends are serialized, so one sink may be shared between sessions.
pub struct KeyLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl KeyLogSink {
    pub fn open<P>(path: P) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)?;

        Ok(KeyLogSink {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, label: &str, client_random: &[u8], secret: &[u8]) -> io::Result<()> {
        let line = format!(
            "{label} {} {}\n",
            hex::encode(client_random),
            hex::encode(secret)
        );
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl rustls::KeyLog for KeyLogSink {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        if let Err(err) = self.append(label, client_random, secret) {
            log::warn!("cannot write key log {}: {err}", self.path.display());
        }
    }
}

impl fmt::Debug for KeyLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLogSink")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, sync::Arc, thread};

    use rustls::KeyLog;
    use temp_dir::TempDir;

    use super::KeyLogSink;

    #[test]
    fn writes_nss_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("key.key");
        let sink = KeyLogSink::open(&path).unwrap();
        sink.log("CLIENT_RANDOM", &[0xab, 0xcd], &[0x01, 0x02, 0x03]);
        sink.log("SERVER_TRAFFIC_SECRET_0", &[0xff], &[0x00]);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "CLIENT_RANDOM abcd 010203\nSERVER_TRAFFIC_SECRET_0 ff 00\n"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("key.key");
        fs::write(&path, "previous\n").unwrap();

        KeyLogSink::open(&path)
            .unwrap()
            .log("CLIENT_RANDOM", &[1], &[2]);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "previous\nCLIENT_RANDOM 01 02\n");
    }

    #[test]
    fn concurrent_appends_keep_lines_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("key.key");
        let sink = Arc::new(KeyLogSink::open(&path).unwrap());

        let threads = (0..8u8)
            .map(|i| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        sink.log("CLIENT_RANDOM", &[i; 32], &[i; 48]);
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 800);
        for line in lines {
            let words = line.split(' ').collect::<Vec<_>>();
            assert_eq!(words.len(), 3);
            assert_eq!(words[1].len(), 64);
            assert_eq!(words[2].len(), 96);
        }
    }
}
