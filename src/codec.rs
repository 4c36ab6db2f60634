// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use crate::Error;
use crate::transform::ImageTransforms;

/// An AV1 decoder supplied by the caller.
///
/// The container hands over the complete bytes of one coded image item and
/// takes back whatever image type the decoder produces.
pub trait Av1Decoder {
    type Image;
    type Error;

    fn decode(&mut self, data: &[u8]) -> Result<Self::Image, Self::Error>;
}

/// Result of [`crate::AvifContainer::decode`].
#[derive(Debug)]
pub struct DecodedImage<I> {
    pub color: I,
    pub alpha: Option<I>,
    /// The color channels are premultiplied by alpha ('prem' reference).
    pub premultiplied_alpha: bool,
    /// To be applied by the caller as crop, then rotate, then mirror.
    pub transforms: ImageTransforms,
}

/// Either the container or the codec failed.
#[derive(Debug)]
pub enum DecodeError<E> {
    Container(Error),
    Codec(E),
}

impl<E> From<Error> for DecodeError<E> {
    fn from(err: Error) -> Self {
        Self::Container(err)
    }
}

impl<E: fmt::Display> fmt::Display for DecodeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(err) => write!(f, "container: {err}"),
            Self::Codec(err) => write!(f, "codec: {err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for DecodeError<E> {}
