//! API surface — the complete set of bindings a script can reach.
//!
//! This is the sandbox boundary. A fresh execution context gets the
//! engine's language builtins plus exactly the bindings listed in
//! [`BINDINGS`]; anything else a script references fails with the
//! engine's own `ReferenceError`.
//!
//! | binding        | capability                                        |
//! |----------------|---------------------------------------------------|
//! | `write`        | append `String(value)` to the output sink         |
//! | `console.*`    | `log`/`info`/`warn`/`error`/`debug`/`trace`, one line each, same sink |
//! | `TextEncoder`  | UTF-8 encode to `Uint8Array`                      |
//! | `TextDecoder`  | UTF-8 decode with replacement characters          |
//! | `Uint8Array`   | the engine's fixed-length byte buffer             |
//!
//! Removed from the engine defaults: `Math.random`.
//!
//! QuickJS as embedded here has no timers, filesystem, process or
//! network objects to begin with. Adding one means adding a row above.

use rquickjs::{Ctx, Exception, Function, IntoJs, Object, TypedArray, Value};

use crate::codec::{byte_buffer, bytes_from_js, decode_bytes, encode_text};
use crate::sink::OutputSink;

const PRELUDE: &str = include_str!("prelude.js");

/// Globals added on top of the language builtins.
pub const BINDINGS: [&str; 5] = ["write", "console", "TextEncoder", "TextDecoder", "Uint8Array"];

/// Engine defaults removed from every context, as `object.property`.
pub const REMOVED: [(&str, &str); 1] = [("Math", "random")];

/// Handles captured while the context is still pristine.
///
/// Script top-level code runs after installation and may overwrite
/// globals such as `Object.freeze`; the host keeps the originals.
pub struct Surface<'js> {
    freeze: Function<'js>,
}

impl<'js> Surface<'js> {
    /// Install the bindings into `ctx`, wiring output to `sink`.
    pub fn install(ctx: &Ctx<'js>, sink: &OutputSink) -> rquickjs::Result<Self> {
        let globals = ctx.globals();

        for (object, property) in REMOVED {
            let target: Object = globals.get(object)?;
            target.remove(property)?;
        }

        let host = Object::new(ctx.clone())?;
        let write_sink = sink.clone();
        host.set(
            "write",
            Function::new(ctx.clone(), move |text: String| write_sink.write(&text))?,
        )?;
        host.set(
            "encode",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, text: String| -> rquickjs::Result<TypedArray<'js, u8>> {
                    byte_buffer(&ctx, &encode_text(&text))
                },
            )?,
        )?;
        host.set(
            "decode",
            Function::new(
                ctx.clone(),
                |ctx: Ctx<'js>, input: Value<'js>| -> rquickjs::Result<String> {
                    match bytes_from_js(&ctx, &input) {
                        Some(bytes) => Ok(decode_bytes(&bytes)),
                        None => Err(Exception::throw_type(
                            &ctx,
                            "TextDecoder.decode: buffer is detached or not a Uint8Array",
                        )),
                    }
                },
            )?,
        )?;

        let install: Function = ctx.eval(PRELUDE)?;
        install.call::<_, ()>((host,))?;

        let object_ctor: Object = globals.get("Object")?;
        let freeze: Function = object_ctor.get("freeze")?;
        Ok(Self { freeze })
    }

    /// `Object.freeze` as it was before any script code ran.
    pub fn freeze(&self, value: impl IntoJs<'js>) -> rquickjs::Result<Object<'js>> {
        self.freeze.call((value,))
    }
}
