// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fetching source archives over HTTP.

use {crate::error::Result, std::path::Path};

/// HTTP user agent for archive downloads.
pub const USER_AGENT: &str = "ipa-resign-server";

/// Download a URL to a local file.
///
/// The response body is streamed to `dest`. Non-success status codes are
/// errors. Callers are responsible for removing `dest` (and its directory)
/// when a failure leaves a partial file behind.
pub fn download_file(url: &str, dest: &Path) -> Result<()> {
    log::info!("downloading {} to {}", url, dest.display());

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;

    let mut response = client.get(url).send()?.error_for_status()?;

    let mut fh = std::fs::File::create(dest)?;
    let written = response.copy_to(&mut fh)?;

    log::debug!("downloaded {} bytes from {}", written, url);

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil, std::io::Read};

    #[test]
    fn downloads_body() -> Result<()> {
        let url = testutil::serve(testutil::http_ok(b"ipa bytes"), 1);

        let temp_dir = tempfile::tempdir()?;
        let dest = temp_dir.path().join("source.ipa");
        download_file(&url, &dest)?;

        let mut data = vec![];
        std::fs::File::open(&dest)?.read_to_end(&mut data)?;
        assert_eq!(data, b"ipa bytes");

        Ok(())
    }

    #[test]
    fn non_success_status_is_error() {
        let url = testutil::serve(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
            1,
        );

        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("source.ipa");

        assert!(matches!(
            download_file(&url, &dest),
            Err(crate::ResignError::Fetch(_))
        ));
    }
}
