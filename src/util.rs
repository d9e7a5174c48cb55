use std::{convert::Infallible, io};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::Frame;
use n0_future::stream::StreamExt;

/// Body type of every response the gateway sends.
pub type HyperBody = UnsyncBoxBody<Bytes, io::Error>;

pub(crate) fn empty_body() -> HyperBody {
    Empty::new().map_err(infallible_to_io).boxed_unsync()
}

pub(crate) fn full_body(data: impl Into<Bytes>) -> HyperBody {
    Full::new(data.into()).map_err(infallible_to_io).boxed_unsync()
}

/// Streams an upstream response body without buffering it.
pub(crate) fn stream_body(response: reqwest::Response) -> HyperBody {
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map(Frame::data).map_err(io::Error::other));
    StreamBody::new(stream).boxed_unsync()
}

fn infallible_to_io(err: Infallible) -> io::Error {
    match err {}
}
