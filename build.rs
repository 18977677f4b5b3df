use std::fs;
use std::path::{Path, PathBuf};

// The one file allowed to end the process.
const EXIT_FUNNEL: &str = "exit.rs";

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR missing");
    let src_dir = Path::new(&manifest_dir).join("src");
    println!("cargo:rerun-if-changed=src");

    let mut files = Vec::new();
    collect_rs_files(&src_dir, &mut files);
    for path in files {
        if path.file_name().and_then(|n| n.to_str()) == Some(EXIT_FUNNEL)
            && path.parent() == Some(src_dir.as_path())
        {
            continue;
        }
        let contents = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
        enforce_exit_funnel(&contents, &path);
    }
}

fn collect_rs_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, files);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            files.push(path);
        }
    }
}

fn enforce_exit_funnel(contents: &str, path: &Path) {
    let forbidden = ["process::exit", "process::abort"];

    for token in forbidden {
        if contents.contains(token) {
            panic!(
                "Forbidden token `{}` outside the exit funnel: {}",
                token,
                path.display()
            );
        }
    }
}
