//! Byte codec — UTF-8 text ⇄ bytes, and byte buffers on the script side.
//!
//! Decoding never fails: malformed sequences become U+FFFD, following the
//! WHATWG "replacement" error mode that `String::from_utf8_lossy` implements.

use rquickjs::{ArrayBuffer, Ctx, FromJs, TypedArray, Value};

/// UTF-8 encoding of `text`.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Interpret `bytes` as UTF-8, replacing malformed sequences.
pub fn decode_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// A fresh `Uint8Array` holding a copy of `bytes`.
pub(crate) fn byte_buffer<'js>(ctx: &Ctx<'js>, bytes: &[u8]) -> rquickjs::Result<TypedArray<'js, u8>> {
    TypedArray::new(ctx.clone(), bytes.to_vec())
}

/// Copy the bytes out of a `Uint8Array` or an `ArrayBuffer`.
///
/// Returns `None` for any other value, and for detached buffers.
pub(crate) fn bytes_from_js<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<Vec<u8>> {
    if let Ok(array) = TypedArray::<u8>::from_js(ctx, value.clone()) {
        return array.as_bytes().map(<[u8]>::to_vec);
    }
    if let Ok(buffer) = ArrayBuffer::from_js(ctx, value.clone()) {
        return buffer.as_bytes().map(<[u8]>::to_vec);
    }
    None
}
