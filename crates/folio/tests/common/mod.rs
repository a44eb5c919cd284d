//! Test harness for isolated pipeline runs.
//!
//! Provides a complete hermetic environment: temp inbound/working/derivative
//! roots, stub encoder/assembler binaries, a local stand-in for the
//! description service, and an in-memory registry behind a real
//! `StageExecutor`.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use folio::config::{load_config_from_str, Config};
use folio::registry::Database;
use folio::StageExecutor;

pub const DESCRIBE_TITLE: &str = "Letters to Famous People";
pub const DESCRIBE_DATE: &str = "1910-1920";

/// Serves a fixed description document over HTTP on a random local port.
/// Lives for the whole test process.
fn spawn_describe_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind describe stub");
    let port = listener.local_addr().expect("local addr").port();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let body = format!(
                r#"{{"title": "{}", "date": "{}"}}"#,
                DESCRIBE_TITLE, DESCRIBE_DATE
            );
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    port
}

fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// Writes a minimal but structurally valid n-page PDF.
pub fn write_minimal_pdf(path: &Path, pages: usize) {
    use lopdf::dictionary;
    use lopdf::{Document, Object as PdfObject};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for _ in 0..pages {
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(PdfObject::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        PdfObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub executor: StageExecutor,
    /// Appended to by the stub encoder, one line per invocation.
    pub encoder_log: PathBuf,
    /// While present, the stub encoder fails on inputs matching `0002`.
    pub encoder_fail_flag: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_upload_endpoint(None)
    }

    /// `upload_endpoint` overrides the storage endpoint; pass an unreachable
    /// address to exercise upload failure paths.
    pub fn with_upload_endpoint(upload_endpoint: Option<&str>) -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        for dir in ["inbound", "work", "derivatives", "bin"] {
            std::fs::create_dir_all(base.join(dir)).unwrap();
        }

        let describe_port = spawn_describe_server();

        let encoder_log = base.join("bin/encoder.log");
        let encoder_fail_flag = base.join("bin/encoder.fail");

        // Stub encoder: logs the input, optionally fails on page 0002,
        // otherwise copies input to output.
        let encoder = base.join("bin/jp2-encoder.sh");
        std::fs::write(
            &encoder,
            format!(
                "#!/bin/sh\necho \"$2\" >> {log}\nif [ -f {flag} ]; then case \"$2\" in *0002*) echo corrupt input >&2; exit 1;; esac; fi\ncp \"$2\" \"$4\"\n",
                log = encoder_log.display(),
                flag = encoder_fail_flag.display(),
            ),
        )
        .unwrap();
        make_executable(&encoder);

        // Stub assembler: counts its inputs and emits a matching template PDF.
        let templates = base.join("bin/templates");
        std::fs::create_dir_all(&templates).unwrap();
        for pages in 1..=8 {
            write_minimal_pdf(&templates.join(format!("template_{}.pdf", pages)), pages);
        }
        let assembler = base.join("bin/pdf-assembler.sh");
        std::fs::write(
            &assembler,
            format!(
                "#!/bin/sh\nn=$(( $# - 2 ))\nwhile [ $# -gt 1 ]; do shift; done\ncp {}/template_$n.pdf \"$1\"\n",
                templates.display(),
            ),
        )
        .unwrap();
        make_executable(&assembler);

        let storage_endpoint = upload_endpoint.unwrap_or("http://127.0.0.1:9");

        let json = format!(
            r#"
            {{
                "version": "1.0",
                "inbound_directory": "{base}/inbound",
                "working_directory": "{base}/work",
                "derivative_directory": "{base}/derivatives",
                "encode": {{ "workers": 1 }},
                "tools": {{
                    "jp2_encoder": "{base}/bin/jp2-encoder.sh",
                    "pdf_assembler": "{base}/bin/pdf-assembler.sh",
                    "timeout_secs": 30
                }},
                "upload": {{ "max_attempts": 2, "base_delay_ms": 1, "max_delay_ms": 2 }},
                "storage": {{
                    "endpoint": "{endpoint}",
                    "region": "us-east-1",
                    "bucket": "derivatives",
                    "access_key": {{ "value": "test" }},
                    "secret_key": {{ "value": "test" }},
                    "path_style": true
                }},
                "describe": {{ "base_url": "http://127.0.0.1:{port}" }},
                "publish": {{
                    "image_base_url": "https://iiif.example.org/images",
                    "manifest_base_url": "https://iiif.example.org/manifests"
                }}
            }}
            "#,
            base = base.display(),
            endpoint = storage_endpoint,
            port = describe_port,
        );
        let config = load_config_from_str(&json).unwrap();

        let db = Database::open_in_memory().unwrap();
        let executor = StageExecutor::new(db, &config).unwrap();

        Self {
            tmp,
            config,
            executor,
            encoder_log,
            encoder_fail_flag,
        }
    }

    /// Builds a serialized bag archive in the inbound directory:
    /// `bag-info.txt` plus `data/{object}/{seq:04}.tif` payloads.
    pub fn make_bag_archive(&self, name: &str, origin: &str, objects: &[(&str, &[u32])]) {
        let staging = self.tmp.path().join("staging").join(name);
        let root = staging.join(name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("bag-info.txt"),
            format!("Origin-Identifier: {}\nBag-Software-Agent: folio-tests\n", origin),
        )
        .unwrap();

        for (local, seqs) in objects {
            let object_dir = root.join("data").join(local);
            std::fs::create_dir_all(&object_dir).unwrap();
            for seq in *seqs {
                image::RgbImage::new(24, 36)
                    .save(object_dir.join(format!("{:04}.tif", seq)))
                    .unwrap();
            }
        }

        let archive_path = self
            .tmp
            .path()
            .join("inbound")
            .join(format!("{}.tar.gz", name));
        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(name, &root).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    pub fn encoder_invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.encoder_log)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    pub fn set_encoder_failing(&self, failing: bool) {
        if failing {
            std::fs::write(&self.encoder_fail_flag, b"fail").unwrap();
        } else {
            let _ = std::fs::remove_file(&self.encoder_fail_flag);
        }
    }
}
