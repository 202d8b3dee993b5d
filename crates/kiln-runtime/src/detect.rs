//! Handler contract detection.
//!
//! A module's callables are found by name after its top-level code has
//! run. Lookups go through the global lexical scope, so `function`,
//! `var`, `let` and `const` declarations are all visible.

use kiln_core::HandlerContract;
use rquickjs::{Ctx, Function, Value};

use crate::error::{LoadError, LoadResult};

/// The entry point a module will be invoked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub contract: HandlerContract,
    /// Declared parameter count (`Function.length`), for diagnostics only.
    pub declared_arity: Option<u32>,
}

impl EntryPoint {
    pub fn name(&self) -> &'static str {
        self.contract.entry_name()
    }
}

/// Choose a contract from the set a module exposes.
///
/// A forced contract wins if present and yields nothing otherwise.
/// Without one, the first of [`HandlerContract::PRECEDENCE`] that is
/// available is chosen.
pub fn select(
    available: &[HandlerContract],
    forced: Option<HandlerContract>,
) -> Option<HandlerContract> {
    match forced {
        Some(contract) => available.contains(&contract).then_some(contract),
        None => HandlerContract::PRECEDENCE
            .into_iter()
            .find(|c| available.contains(c)),
    }
}

/// The callable bound to `contract`'s entry name, if there is one.
pub fn entry_function<'js>(
    ctx: &Ctx<'js>,
    contract: HandlerContract,
) -> rquickjs::Result<Option<Function<'js>>> {
    let name = contract.entry_name();
    let value: Value = ctx.eval(format!(
        "typeof {name} === 'function' ? {name} : undefined"
    ))?;
    Ok(value.into_function())
}

fn declared_arity(ctx: &Ctx<'_>, contract: HandlerContract) -> Option<u32> {
    let name = contract.entry_name();
    let length: i32 = ctx.eval(format!("{name}.length")).ok()?;
    u32::try_from(length).ok()
}

/// Inspect an evaluated module and pick its entry point.
pub fn detect(
    ctx: &Ctx<'_>,
    module: &str,
    forced: Option<HandlerContract>,
) -> LoadResult<EntryPoint> {
    let mut found = Vec::new();
    for contract in HandlerContract::PRECEDENCE {
        let function = entry_function(ctx, contract).map_err(|e| LoadError::Engine(e.to_string()))?;
        if function.is_some() {
            found.push((contract, declared_arity(ctx, contract)));
        }
    }

    let available: Vec<HandlerContract> = found.iter().map(|(c, _)| *c).collect();
    let Some(contract) = select(&available, forced) else {
        let wanted = match forced {
            Some(contract) => vec![contract],
            None => HandlerContract::PRECEDENCE.to_vec(),
        };
        return Err(LoadError::no_entry_point(module, &wanted));
    };

    if available.len() > 1 {
        tracing::warn!(
            %module,
            %contract,
            shadowed = ?available.iter().filter(|c| **c != contract).map(|c| c.entry_name()).collect::<Vec<_>>(),
            "module defines several entry points; using the most specific"
        );
    }

    let declared_arity = found
        .iter()
        .find(|(c, _)| *c == contract)
        .and_then(|(_, arity)| *arity);
    if let Some(declared) = declared_arity {
        if declared != contract.arity() {
            tracing::warn!(
                %module,
                %contract,
                declared,
                expected = contract.arity(),
                "entry point declares an unexpected number of parameters"
            );
        }
    }

    Ok(EntryPoint {
        contract,
        declared_arity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use HandlerContract::*;

    fn detect_in(source: &str, forced: Option<HandlerContract>) -> LoadResult<EntryPoint> {
        let rt = rquickjs::Runtime::new().unwrap();
        let context = rquickjs::Context::full(&rt).unwrap();
        context.with(|ctx| {
            ctx.eval::<(), _>(source).unwrap();
            detect(&ctx, "test", forced)
        })
    }

    #[test]
    fn precedence_prefers_two_arg() {
        assert_eq!(select(&[ZeroArg, TwoArg], None), Some(TwoArg));
        assert_eq!(select(&[ZeroArg, SingleArg], None), Some(SingleArg));
        assert_eq!(select(&[SingleArg, TwoArg, ZeroArg], None), Some(TwoArg));
        assert_eq!(select(&[ZeroArg], None), Some(ZeroArg));
        assert_eq!(select(&[], None), None);
    }

    #[test]
    fn forced_contract_overrides_precedence() {
        assert_eq!(select(&[ZeroArg, TwoArg], Some(ZeroArg)), Some(ZeroArg));
        assert_eq!(select(&[TwoArg], Some(SingleArg)), None);
    }

    #[test]
    fn detects_each_shape() {
        let cases = [
            ("function main() {}", ZeroArg),
            ("function handleBody(body) {}", SingleArg),
            ("async function handleRequest(req, res) {}", TwoArg),
        ];
        for (source, expected) in cases {
            let entry = detect_in(source, None).unwrap();
            assert_eq!(entry.contract, expected, "{source}");
            assert_eq!(entry.declared_arity, Some(expected.arity()));
        }
    }

    #[test]
    fn two_arg_wins_over_zero_arg() {
        let entry = detect_in(
            "function main() {} async function handleRequest(req, res) {}",
            None,
        )
        .unwrap();
        assert_eq!(entry.contract, TwoArg);
        assert_eq!(entry.name(), "handleRequest");
    }

    #[test]
    fn lexical_declarations_are_visible() {
        let entry = detect_in("const handleBody = async (body) => body.length;", None).unwrap();
        assert_eq!(entry.contract, SingleArg);
    }

    #[test]
    fn non_callables_are_ignored() {
        let err = detect_in("var main = 1; var handleRequest = {};", None).unwrap_err();
        assert!(matches!(err, LoadError::NoRecognizedEntryPoint { .. }));
    }

    #[test]
    fn declared_arity_does_not_change_selection() {
        let entry = detect_in("function handleRequest(req) {}", None).unwrap();
        assert_eq!(entry.contract, TwoArg);
        assert_eq!(entry.declared_arity, Some(1));
    }

    #[test]
    fn missing_forced_entry_is_an_error() {
        let err = detect_in("function main() {}", Some(TwoArg)).unwrap_err();
        match err {
            LoadError::NoRecognizedEntryPoint { expected, .. } => {
                assert_eq!(expected, "`handleRequest`");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
