//! Static `index.html` files for serving a link directory as a simple package index.

use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.html";

fn escape(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#x27;"),
			c => out.push(c),
		}
	}
	out
}

fn file_hash(path: &Path) -> crate::Result<String> {
	let bytes = std::fs::read(path)?;
	Ok(sha256::digest(bytes.as_slice()))
}

/// Renders the index of one directory.
pub fn render_index(dir: &Path) -> crate::Result<String> {
	let mut dirs = Vec::<String>::new();
	let mut files = Vec::<(String, PathBuf)>::new();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name().to_string_lossy().to_string();
		let path = entry.path();
		if path.is_dir() {
			dirs.push(name);
		} else if name != INDEX_FILE && path.is_file() {
			files.push((name, path));
		}
	}
	dirs.sort();
	files.sort();

	let dir_name = dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
	let title = escape(&format!("links for \"{}\"", dir_name));

	let mut html = format!("<html>\n<head><title>{0}</title></head>\n<body>\n<h1>{0}</h1>\n", title);
	for name in dirs {
		let name = escape(&name);
		html.push_str(&format!("<a href=\"{0}/\" rel=\"internal\">{0}</a><br/>\n", name));
	}
	for (name, path) in files {
		let hash = file_hash(&path)?;
		let name = escape(&name);
		html.push_str(&format!("<a href=\"{0}#sha256={1}\" rel=\"internal\">{0}</a><br/>\n", name, hash));
	}
	html.push_str("</body>\n</html>\n");
	Ok(html)
}

/// Writes an index into every directory below `repo_dir`, skipping directories under `excludes`.
///
/// # Returns
/// The index files written.
pub fn create_html_indexes(repo_dir: &Path, excludes: &[PathBuf]) -> crate::Result<Vec<PathBuf>> {
	let mut written = Vec::new();
	let walker = walkdir::WalkDir::new(repo_dir)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|e| !excludes.iter().any(|x| e.path().starts_with(x)));

	for entry in walker {
		let entry = entry?;
		if !entry.file_type().is_dir() {
			continue;
		}
		log::debug!("Path found: {}", entry.path().display());
		let index = entry.path().join(INDEX_FILE);
		std::fs::write(&index, render_index(entry.path())?)?;
		log::info!("Index file [ {} ] created", index.display());
		written.push(index);
	}
	Ok(written)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn html_index_lists_dirs_then_files() {
		let root = tempfile::tempdir().unwrap();
		let repo = root.path().join("links");
		std::fs::create_dir_all(repo.join("six")).unwrap();
		std::fs::create_dir_all(repo.join("excluded/deep")).unwrap();
		std::fs::write(repo.join("b<1>.whl"), b"abc").unwrap();

		let written = create_html_indexes(&repo, &[repo.join("excluded")]).unwrap();
		assert_eq!(written.len(), 2);
		assert!(!repo.join("excluded/index.html").exists());

		let index = std::fs::read_to_string(repo.join("index.html")).unwrap();
		assert!(index.contains("<title>links for &quot;links&quot;</title>"));
		let six = index.find("href=\"six/\"").unwrap();
		let file = index.find("b&lt;1&gt;.whl#sha256=ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap();
		assert!(six < file);
		assert!(!index.contains("index.html#"));
	}
}
