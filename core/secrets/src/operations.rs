//! Document, file and directory operations over a hybrid engine.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::format::DocumentFormat;
use crate::tree::{decrypt_value, encrypt_value};
use crate::writer::SecureWriter;
use publicpillar_common::{Error, Result};
use publicpillar_crypto::HybridEngine;

/// Files written by a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Output paths, in the order they were written.
    pub written: Vec<PathBuf>,
}

/// Encrypts and decrypts whole documents with one engine.
pub struct PillarOperations<'a> {
    engine: &'a HybridEngine,
    format: Option<DocumentFormat>,
}

impl<'a> PillarOperations<'a> {
    /// Create an operations handler; formats follow file extensions.
    pub fn new(engine: &'a HybridEngine) -> Self {
        Self {
            engine,
            format: None,
        }
    }

    /// Force one document format instead of detecting it per file.
    pub fn with_format(mut self, format: Option<DocumentFormat>) -> Self {
        self.format = format;
        self
    }

    fn format_for(&self, path: &Path) -> DocumentFormat {
        self.format.unwrap_or_else(|| DocumentFormat::from_path(path))
    }

    /// Encrypt a plaintext document given as text.
    pub fn encrypt_document(
        &self,
        text: &str,
        input: DocumentFormat,
        output: DocumentFormat,
    ) -> Result<String> {
        let plain = input.parse(text)?;
        output.render(&encrypt_value(self.engine, &plain)?)
    }

    /// Decrypt a ciphertext document given as text.
    pub fn decrypt_document(
        &self,
        text: &str,
        input: DocumentFormat,
        output: DocumentFormat,
    ) -> Result<String> {
        let sealed = input.parse(text)?;
        output.render(&decrypt_value(self.engine, &sealed)?)
    }

    /// Encrypt a plaintext document file, rendering in `output` format.
    pub fn encrypt_file(&self, path: &Path, output: DocumentFormat) -> Result<String> {
        debug!(path = %path.display(), "Encrypting file");
        let text = std::fs::read_to_string(path)?;
        self.encrypt_document(&text, self.format_for(path), output)
    }

    /// Decrypt a ciphertext document file, rendering in its own format.
    pub fn decrypt_file(&self, path: &Path) -> Result<String> {
        debug!(path = %path.display(), "Decrypting file");
        let text = std::fs::read_to_string(path)?;
        let format = self.format_for(path);
        self.decrypt_document(&text, format, format)
    }

    /// Decrypt every file under `source` into the same relative path under
    /// `output`.
    ///
    /// # Postconditions
    /// - Every output file is owner-only
    /// - Missing output directories are created
    ///
    /// # Errors
    /// - Any file failing to decrypt aborts the run before anything is written
    pub fn decrypt_directory(&self, source: &Path, output: &Path) -> Result<BatchReport> {
        if !source.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Not a directory: {}",
                source.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(source, &mut files)?;

        let mut decrypted = Vec::with_capacity(files.len());
        for file in &files {
            let relative = file.strip_prefix(source).map_err(|_| {
                Error::InvalidInput(format!("{} escapes {}", file.display(), source.display()))
            })?;
            decrypted.push((output.join(relative), self.decrypt_file(file)?));
        }

        let mut report = BatchReport::default();
        for (target, contents) in decrypted {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!(path = %target.display(), "Writing file");
            SecureWriter::write(&target, contents.as_bytes())?;
            report.written.push(target);
        }

        Ok(report)
    }
}

/// Regular files below `dir`, sorted for a stable processing order.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use publicpillar_crypto::KeyMaterial;
    use serde_json::json;
    use tempfile::TempDir;

    const KEY_2048: &str = include_str!("../../crypto/testdata/key2048.pem");
    const KEY_2048_ENCRYPTED: &str = include_str!("../../crypto/testdata/key2048enc.pem");
    const PUB_2048: &str = include_str!("../../crypto/testdata/key2048.pub");
    const CIPHERTEXT_YML: &str = include_str!("../../crypto/testdata/ciphertext.yml");

    fn engine(pem: &str, passphrase: Option<&str>) -> HybridEngine {
        HybridEngine::new(KeyMaterial::parse(pem, passphrase).unwrap())
    }

    fn encrypted_dir(engine: &HybridEngine, root: &Path) {
        let ops = PillarOperations::new(engine);
        let database = json!({ "database": { "password": "supersecretdbpassword" } });
        let web = json!({ "webserver": { "secret_key": "signstuffwiththiskey".repeat(10) } });

        std::fs::create_dir_all(root.join("apps")).unwrap();
        for (name, doc) in [("database.yml", &database), ("apps/web.json", &web)] {
            let format = DocumentFormat::from_path(Path::new(name));
            let text = ops
                .encrypt_document(&format.render(doc).unwrap(), format, format)
                .unwrap();
            std::fs::write(root.join(name), text).unwrap();
        }
    }

    #[test]
    fn test_decrypts_foreign_ciphertext() {
        // Produced by an independent RSA-OAEP(SHA-512) / AES-256-CFB8 implementation.
        let engine = engine(KEY_2048_ENCRYPTED, Some("test"));
        let ops = PillarOperations::new(&engine);

        let text = ops
            .decrypt_document(CIPHERTEXT_YML, DocumentFormat::Yaml, DocumentFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({
                "database": { "password": "supersecretdbpassword" },
                "webserver": { "secret_key": "signstuffwiththiskey".repeat(10) },
            })
        );
    }

    #[test]
    fn test_encrypt_json_to_yaml() {
        let public = engine(PUB_2048, None);
        let private = engine(KEY_2048, None);
        let plaintext = r#"{ "all": { "DB_PW": "pw", "SECRET_KEY": "sk" } }"#;

        let encrypted = PillarOperations::new(&public)
            .encrypt_document(plaintext, DocumentFormat::Json, DocumentFormat::Yaml)
            .unwrap();
        let parsed = DocumentFormat::Yaml.parse(&encrypted).unwrap();
        assert_eq!(parsed["all"].as_object().unwrap().len(), 2);

        let decrypted = PillarOperations::new(&private)
            .decrypt_document(&encrypted, DocumentFormat::Yaml, DocumentFormat::Json)
            .unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&decrypted).unwrap(),
            json!({ "all": { "DB_PW": "pw", "SECRET_KEY": "sk" } })
        );
    }

    #[test]
    fn test_numeric_secrets_keep_their_bytes() {
        let engine = engine(KEY_2048, None);
        let ops = PillarOperations::new(&engine);
        let plaintext = "pin: 007\nratio: 1.50\nexp: 1e3\nacct: 123456789012345678901234\n";

        let encrypted = ops
            .encrypt_document(plaintext, DocumentFormat::Yaml, DocumentFormat::Yaml)
            .unwrap();
        let decrypted = ops
            .decrypt_document(&encrypted, DocumentFormat::Yaml, DocumentFormat::Json)
            .unwrap();

        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&decrypted).unwrap(),
            json!({
                "pin": "007",
                "ratio": "1.50",
                "exp": "1e3",
                "acct": "123456789012345678901234",
            })
        );
    }

    #[test]
    fn test_decrypt_directory_mirrors_tree() {
        let engine = engine(KEY_2048, None);
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        encrypted_dir(&engine, source.path());

        let target = output.path().join("nested").join("out");
        let report = PillarOperations::new(&engine)
            .decrypt_directory(source.path(), &target)
            .unwrap();

        assert_eq!(
            report.written,
            vec![target.join("apps").join("web.json"), target.join("database.yml")]
        );

        let web: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(target.join("apps/web.json")).unwrap())
                .unwrap();
        assert_eq!(
            web["webserver"]["secret_key"],
            json!("signstuffwiththiskey".repeat(10))
        );

        let database = DocumentFormat::Yaml
            .parse(&std::fs::read_to_string(target.join("database.yml")).unwrap())
            .unwrap();
        assert_eq!(database["database"]["password"], json!("supersecretdbpassword"));
    }

    #[cfg(unix)]
    #[test]
    fn test_decrypt_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let engine = engine(KEY_2048, None);
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        encrypted_dir(&engine, source.path());

        let existing = output.path().join("database.yml");
        std::fs::write(&existing, b"prepillarcontents").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();

        let report = PillarOperations::new(&engine)
            .decrypt_directory(source.path(), output.path())
            .unwrap();

        assert_eq!(report.written.len(), 2);
        for path in &report.written {
            let mode = std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600, "{}", path.display());
        }
    }

    #[test]
    fn test_decrypt_directory_is_all_or_nothing() {
        let engine = engine(KEY_2048, None);
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        encrypted_dir(&engine, source.path());
        std::fs::write(source.path().join("zz-broken.yml"), "a: '%%%'\n").unwrap();

        let result = PillarOperations::new(&engine).decrypt_directory(source.path(), output.path());

        assert!(matches!(result, Err(Error::MalformedCiphertext(_))));
        assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_decrypt_directory_requires_directory() {
        let engine = engine(KEY_2048, None);
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.yml");
        std::fs::write(&file, "").unwrap();

        assert!(matches!(
            PillarOperations::new(&engine).decrypt_directory(&file, temp.path()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_forced_format() {
        let engine = engine(KEY_2048, None);
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secrets.txt");
        std::fs::write(&path, r#"{"token": "abc"}"#).unwrap();

        let ops = PillarOperations::new(&engine).with_format(Some(DocumentFormat::Json));
        let encrypted = ops.encrypt_file(&path, DocumentFormat::Json).unwrap();
        std::fs::write(&path, encrypted).unwrap();

        let decrypted = ops.decrypt_file(&path).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&decrypted).unwrap(),
            json!({ "token": "abc" })
        );
    }
}
