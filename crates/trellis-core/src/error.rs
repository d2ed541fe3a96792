use thiserror::Error;

use crate::hooks::HookKind;
use crate::host::HostError;

/// Everything the engine can fail with.
///
/// User code (views, effect bodies, cleanups, listeners) reports failures as
/// [`anyhow::Error`]; the engine wraps them with the name of the component
/// they came from.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "hook order changed in `{component}` at slot {slot}: expected {}, found {}",
        describe(.expected),
        describe(.found)
    )]
    HookOrderMismatch {
        component: String,
        slot: usize,
        expected: Option<HookKind>,
        found: Option<HookKind>,
    },
    #[error("view of `{component}` failed: {source}")]
    Render {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("effect in `{component}` failed: {source}")]
    Effect {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cleanup in `{component}` failed: {source}")]
    Cleanup {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("component `{name}` is already defined")]
    DuplicateDefinition { name: String },
    #[error("`{component}` kept scheduling updates after {passes} render passes")]
    RenderLoop { component: String, passes: usize },
    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    HookOrderMismatch,
    Render,
    Effect,
    Cleanup,
    DuplicateDefinition,
    RenderLoop,
    Host,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::HookOrderMismatch { .. } => ErrorKind::HookOrderMismatch,
            Error::Render { .. } => ErrorKind::Render,
            Error::Effect { .. } => ErrorKind::Effect,
            Error::Cleanup { .. } => ErrorKind::Cleanup,
            Error::DuplicateDefinition { .. } => ErrorKind::DuplicateDefinition,
            Error::RenderLoop { .. } => ErrorKind::RenderLoop,
            Error::Host(_) => ErrorKind::Host,
        }
    }

    /// Wraps a failure raised by a view. Engine errors that travelled through
    /// user code with `?` keep their original variant.
    pub(crate) fn from_view(component: &str, err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(engine) => engine,
            Err(source) => Error::Render {
                component: component.to_owned(),
                source,
            },
        }
    }

    pub(crate) fn from_effect(component: &str, err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(engine) => engine,
            Err(source) => Error::Effect {
                component: component.to_owned(),
                source,
            },
        }
    }
}

fn describe(kind: &Option<HookKind>) -> String {
    match kind {
        Some(kind) => kind.to_string(),
        None => "no hook".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_errors_keep_engine_variants() {
        let mismatch = Error::HookOrderMismatch {
            component: "Counter".into(),
            slot: 1,
            expected: Some(HookKind::State),
            found: Some(HookKind::Memo),
        };
        let wrapped = Error::from_view("Counter", anyhow::Error::new(mismatch));
        assert_eq!(wrapped.kind(), ErrorKind::HookOrderMismatch);

        let plain = Error::from_view("Counter", anyhow::anyhow!("boom"));
        assert_eq!(plain.kind(), ErrorKind::Render);
        assert_eq!(plain.to_string(), "view of `Counter` failed: boom");
    }

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = Error::HookOrderMismatch {
            component: "Form".into(),
            slot: 3,
            expected: Some(HookKind::LayoutEffect),
            found: None,
        };
        assert_eq!(
            err.to_string(),
            "hook order changed in `Form` at slot 3: expected layout effect, found no hook"
        );
    }
}
