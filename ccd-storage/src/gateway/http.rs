use base64::Engine;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::{
    DiffEntriesQuery, Entry, EntryClient, EntryRequest, ErrorBody, Reply, UploadReceipt,
    CONTENT_TYPE_OCTET_STREAM, UPLOAD_HASH_HEADER,
};
use crate::driver::ByteStream;
use crate::error::{DriverError, TransportError};

type RequestBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// [`EntryClient`] talking to the content API over HTTPS
#[derive(Clone)]
pub struct HttpEntryClient {
    client: Client<HttpsConnector<HttpConnector>, RequestBody>,
    api_base: String,
    authorization: String,
}

impl HttpEntryClient {
    /// Creates a client for the API at `base_url`, authenticating with `api_key`.
    ///
    /// The key is presented as the password of basic authentication with an
    /// empty user name.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, DriverError> {
        if base_url.is_empty() {
            return Err(DriverError::InvalidConfiguration(
                "empty base url".to_string(),
            ));
        }

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!(":{}", api_key));

        Ok(Self {
            client,
            api_base: format!("{}/api/v1", base_url.trim_end_matches('/')),
            authorization: format!("Basic {}", credentials),
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/buckets/{}", self.api_base, urlencoding::encode(bucket))
    }

    fn entry_url(&self, bucket: &str, entry_id: &str) -> String {
        format!(
            "{}/entries/{}",
            self.bucket_url(bucket),
            urlencoding::encode(entry_id)
        )
    }

    async fn send(
        &self,
        request: hyper::http::request::Builder,
        body: RequestBody,
    ) -> Result<Response<Incoming>, TransportError> {
        let request: Request<RequestBody> = request
            .header(header::AUTHORIZATION, &self.authorization)
            .body(body)?;
        trace!(method = %request.method(), uri = %request.uri(), "Sending request");
        Ok(self.client.request(request).await?)
    }

    async fn send_empty(
        &self,
        method: Method,
        uri: &str,
    ) -> Result<Response<Incoming>, TransportError> {
        self.send(Request::builder().method(method).uri(uri), empty_body())
            .await
    }
}

fn empty_body() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn json_body<T: serde::Serialize>(value: &T) -> Result<RequestBody, TransportError> {
    let json = serde_json::to_vec(value)?;
    Ok(Full::new(Bytes::from(json))
        .map_err(|never| match never {})
        .boxed_unsync())
}

async fn read_json<T: DeserializeOwned>(response: Response<Incoming>) -> Result<T, TransportError> {
    let body = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

async fn read_reason(response: Response<Incoming>) -> String {
    let status = response.status();
    let body = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(|e| e.reason)
        .unwrap_or_else(|| status.to_string())
}

/// Maps a non-success response onto the reply variants the gateway understands
async fn failure<T>(response: Response<Incoming>) -> Reply<T> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        Reply::NotFound(read_reason(response).await)
    } else if status.is_server_error() {
        Reply::ServerError {
            status: status.as_u16(),
            reason: read_reason(response).await,
        }
    } else {
        Reply::Unexpected(status.as_u16())
    }
}

async fn json_reply<T: DeserializeOwned>(
    response: Response<Incoming>,
) -> Result<Reply<T>, TransportError> {
    if response.status().is_success() {
        Ok(Reply::Ok(read_json(response).await?))
    } else {
        Ok(failure(response).await)
    }
}

#[async_trait::async_trait]
impl EntryClient for HttpEntryClient {
    async fn get_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Reply<Entry>, TransportError> {
        let uri = format!(
            "{}/entry_by_path/?path={}",
            self.bucket_url(bucket),
            urlencoding::encode(path)
        );
        let response = self.send_empty(Method::GET, &uri).await?;
        json_reply(response).await
    }

    async fn create_or_update_entry_by_path(
        &self,
        bucket: &str,
        path: &str,
        update_if_exists: bool,
        request: &EntryRequest,
    ) -> Result<Reply<Entry>, TransportError> {
        let uri = format!(
            "{}/entry_by_path/?path={}&updateIfExists={}",
            self.bucket_url(bucket),
            urlencoding::encode(path),
            update_if_exists
        );
        let builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let response = self.send(builder, json_body(request)?).await?;
        json_reply(response).await
    }

    async fn upload_content(
        &self,
        bucket: &str,
        entry_id: &str,
        content_length: u64,
        body: ByteStream,
    ) -> Result<Reply<UploadReceipt>, TransportError> {
        let uri = format!("{}/content/", self.entry_url(bucket, entry_id));
        let builder = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::CONTENT_TYPE, CONTENT_TYPE_OCTET_STREAM)
            .header(header::CONTENT_LENGTH, content_length);
        let body = StreamBody::new(body.map_ok(Frame::data)).boxed_unsync();

        let response = self.send(builder, body).await?;
        if !response.status().is_success() {
            return Ok(failure(response).await);
        }

        let upload_hash = response
            .headers()
            .get(UPLOAD_HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Ok(Reply::Ok(UploadReceipt { upload_hash }))
    }

    async fn get_content(
        &self,
        bucket: &str,
        entry_id: &str,
        offset: Option<u64>,
    ) -> Result<Reply<ByteStream>, TransportError> {
        let uri = format!("{}/content/", self.entry_url(bucket, entry_id));
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(offset) = offset {
            builder = builder.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = self.send(builder, empty_body()).await?;
        if !response.status().is_success() {
            return Ok(failure(response).await);
        }

        let data = response.into_body().into_data_stream();
        let stream = TryStreamExt::map_err(data, std::io::Error::other).boxed();
        Ok(Reply::Ok(stream))
    }

    async fn delete_entry(
        &self,
        bucket: &str,
        entry_id: &str,
    ) -> Result<Reply<()>, TransportError> {
        let uri = format!("{}/", self.entry_url(bucket, entry_id));
        let response = self.send_empty(Method::DELETE, &uri).await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(Reply::NoContent),
            status if status.is_success() => Ok(Reply::Ok(())),
            _ => Ok(failure(response).await),
        }
    }

    async fn get_diff_entries(
        &self,
        bucket: &str,
        query: &DiffEntriesQuery,
    ) -> Result<Reply<Vec<Entry>>, TransportError> {
        let uri = format!(
            "{}/diff/entries/?path={}&page={}&per_page={}",
            self.bucket_url(bucket),
            urlencoding::encode(&query.path),
            query.page,
            query.per_page
        );
        let response = self.send_empty(Method::GET, &uri).await?;

        // The last page comes back as 204, or as a success without a body.
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Reply::NoContent);
        }
        if !response.status().is_success() {
            return Ok(failure(response).await);
        }

        let body = response.into_body().collect().await?.to_bytes();
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Reply::NoContent);
        }
        Ok(Reply::Ok(serde_json::from_slice(&body)?))
    }
}
