use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use anyhow::Result;

const RANDOM_TOKEN_LEN: usize = 12;

pub fn encode_base64(data: &[u8]) -> String {
	general_purpose::STANDARD.encode(data)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
	Ok(general_purpose::STANDARD.decode(data)?)
}

/// Lowercased extension of a file name, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
	let (stem, ext) = name.rsplit_once('.')?;
	if stem.is_empty() || ext.is_empty() || ext.contains('/') {
		return None;
	}
	Some(ext.to_ascii_lowercase())
}

/// Collision-resistant storage path: `<prefix>/<unix-millis>-<random>.<ext>`.
pub fn generate_storage_path(prefix: &str, original_name: &str) -> String {
	let token: String = rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(RANDOM_TOKEN_LEN)
		.map(char::from)
		.collect();
	let file_name = match file_extension(original_name) {
		Some(ext) => format!("{}-{}.{}", Utc::now().timestamp_millis(), token.to_ascii_lowercase(), ext),
		None => format!("{}-{}", Utc::now().timestamp_millis(), token.to_ascii_lowercase()),
	};
	let prefix = prefix.trim_matches('/');
	if prefix.is_empty() {
		file_name
	} else {
		format!("{}/{}", prefix, file_name)
	}
}
