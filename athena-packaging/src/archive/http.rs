// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP client for upstream archives. */

use {
    crate::{
        archive::ArchiveClient,
        error::{AthenaError, Result},
        io::DataResolver,
    },
    async_trait::async_trait,
    futures::{AsyncRead, TryStreamExt},
    reqwest::{Client, IntoUrl, Url},
    std::pin::Pin,
};

fn io_error(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message)
}

async fn fetch_url(
    client: &Client,
    root_url: &Url,
    path: &str,
) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
    let res = client.get(root_url.join(path)?).send().await.map_err(|e| {
        AthenaError::ArchiveIoPath(
            path.to_string(),
            io_error(format!("error sending HTTP request: {:?}", e)),
        )
    })?;

    let res = res.error_for_status().map_err(|e| {
        AthenaError::ArchiveIoPath(
            path.to_string(),
            io_error(format!("bad HTTP status code: {:?}", e)),
        )
    })?;

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| io_error(format!("{:?}", e)))
            .into_async_read(),
    ))
}

/// Client for an upstream archive served via HTTP.
///
/// Instances are bound to a base URL, the directory holding `dists/` and
/// the package pool.
#[derive(Debug)]
pub struct HttpArchiveClient {
    client: Client,
    root_url: Url,
}

impl HttpArchiveClient {
    /// Construct an instance bound to the specified URL.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        Self::new_client(Client::default(), url)
    }

    /// Construct an instance using the given [Client] and URL.
    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Trailing slashes are significant to Url::join().
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self { client, root_url })
    }
}

#[async_trait]
impl DataResolver for HttpArchiveClient {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        fetch_url(&self.client, &self.root_url, path).await
    }

    async fn get_path_metadata(&self, path: &str) -> Result<Option<u64>> {
        let res = self
            .client
            .head(self.root_url.join(path)?)
            .send()
            .await
            .map_err(|e| {
                AthenaError::ArchiveIoPath(
                    path.to_string(),
                    io_error(format!("error sending HTTP request: {:?}", e)),
                )
            })?;

        let res = res.error_for_status().map_err(|e| {
            AthenaError::ArchiveIoPath(
                path.to_string(),
                io_error(format!("bad HTTP status code: {:?}", e)),
            )
        })?;

        Ok(res.content_length())
    }
}

impl ArchiveClient for HttpArchiveClient {
    fn url(&self) -> Result<Url> {
        Ok(self.root_url.clone())
    }
}
