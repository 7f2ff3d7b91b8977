//! Output-sink handling for `nzslc -o` (spec §6.1): a plain directory, or
//! the `@stdout` / `@null` sentinels.

use std::fs;
use std::io::Write;

use crate::args::OutputTarget;

/// Writes `bytes` to `<module_name>.<extension>` under `target`, or to
/// stdout/nowhere for the sentinel targets. I/O failures are reported and
/// end the process, matching the rest of the CLI's fail-fast policy.
pub fn write(target: &OutputTarget, module_name: &str, extension: &str, is_header: bool, bytes: &[u8]) {
    match target {
        OutputTarget::Null => {}
        OutputTarget::Stdout => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(bytes);
        }
        OutputTarget::Directory(dir) => {
            let file_extension = if is_header { "h" } else { extension };
            let path = dir.join(format!("{module_name}.{file_extension}"));
            if let Err(error) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, bytes)) {
                eprintln!("error writing {}: {error}", path.display());
                std::process::exit(1);
            }
        }
    }
}

/// Wraps `bytes` as a C-style byte-array header (spec §6.1 `-header`
/// suffix), named after the sanitized `<module_name>_<extension>` ident.
pub fn as_c_header(module_name: &str, extension: &str, bytes: &[u8]) -> Vec<u8> {
    let ident = sanitize_ident(&format!("{module_name}_{}", extension.replace('.', "_")));
    let mut out = String::new();
    out.push_str("#pragma once\n\n");
    out.push_str(&format!("static const unsigned char {ident}[] = {{\n"));
    for chunk in bytes.chunks(16) {
        out.push_str("    ");
        for byte in chunk {
            out.push_str(&format!("0x{byte:02x}, "));
        }
        out.push('\n');
    }
    out.push_str("};\n");
    out.push_str(&format!("static const unsigned int {ident}_size = {};\n", bytes.len()));
    out.into_bytes()
}

fn sanitize_ident(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}
