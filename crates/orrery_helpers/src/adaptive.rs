//! Adaptive performance consumers
//!
//! Components that follow `performance.current` while the root is regressed
//! and put things back the way they found them when unmounted.

use orrery_core::Scope;
use orrery_fiber::{use_three, EventsPatch};

use crate::error::Result;

/// Scale the pixel ratio with the current performance factor
///
/// The pixel ratio at mount time is the baseline; it is restored on
/// unmount even if the root is still regressed.
pub fn adaptive_dpr(scope: &Scope) -> Result<()> {
    let ctx = use_three(scope)?;
    let initial = ctx.graph().untrack(|| ctx.dpr())?;

    {
        let ctx = ctx.clone();
        scope.create_effect(move |_| {
            let Ok(performance) = ctx.performance() else {
                return;
            };
            if let Err(err) = ctx.set_dpr(performance.current * initial) {
                tracing::debug!(error = %err, "adaptive dpr skipped");
            }
        });
    }

    scope.on_cleanup(move || {
        if ctx.is_alive() {
            if let Err(err) = ctx.set_dpr(initial) {
                tracing::debug!(error = %err, "adaptive dpr restore skipped");
            }
        }
    });
    Ok(())
}

/// Turn pointer-event raycasting off while performance is regressed
///
/// The enabled flag at mount time is restored on unmount.
pub fn adaptive_events(scope: &Scope) -> Result<()> {
    let ctx = use_three(scope)?;
    let initial = ctx.graph().untrack(|| ctx.events())?.enabled;

    {
        let ctx = ctx.clone();
        scope.create_effect(move |_| {
            let Ok(performance) = ctx.performance() else {
                return;
            };
            let enabled = !performance.is_regressed();
            if let Err(err) = ctx.set_events(EventsPatch::enabled(enabled)) {
                tracing::debug!(error = %err, "adaptive events skipped");
            }
        });
    }

    scope.on_cleanup(move || {
        if ctx.is_alive() {
            if let Err(err) = ctx.set_events(EventsPatch::enabled(initial)) {
                tracing::debug!(error = %err, "adaptive events restore skipped");
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::{Element, ReactiveGraph};
    use orrery_fiber::{
        DprRange, HeadlessRenderer, PerformanceConfig, Root, RootConfig, RootDescriptor,
    };

    fn root(graph: &ReactiveGraph) -> Root {
        let (_, renderer) = HeadlessRenderer::shared(Element::new("canvas"));
        let config = RootConfig {
            device_pixel_ratio: 2.0,
            dpr: DprRange { min: 0.5, max: 2.0 },
            performance: PerformanceConfig {
                min: 0.5,
                ..PerformanceConfig::default()
            },
            ..RootConfig::default()
        };
        Root::create(graph, RootDescriptor::new(renderer).with_config(config)).unwrap()
    }

    #[test]
    fn test_dpr_follows_performance_and_restores() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context().clone();
        let component = root.mount();
        adaptive_dpr(&component).unwrap();
        assert_eq!(ctx.dpr().unwrap(), 2.0);

        ctx.regress();
        assert_eq!(ctx.dpr().unwrap(), 1.0);

        component.dispose();
        assert_eq!(ctx.dpr().unwrap(), 2.0);
        assert!(ctx.performance().unwrap().is_regressed());
    }

    #[test]
    fn test_events_disabled_while_regressed() {
        let graph = ReactiveGraph::new();
        let root = root(&graph);
        let ctx = root.context().clone();
        let component = root.mount();
        adaptive_events(&component).unwrap();
        assert!(ctx.events().unwrap().enabled);

        ctx.regress();
        assert!(!ctx.events().unwrap().enabled);

        // Recover fully: debounce 200ms, then 2.0/s from 0.5
        root.advance(0.0);
        root.advance(0.3);
        root.advance(0.6);
        assert!(!ctx.performance().unwrap().is_regressed());
        assert!(ctx.events().unwrap().enabled);

        ctx.regress();
        component.dispose();
        assert!(ctx.events().unwrap().enabled);
    }

    #[test]
    fn test_outside_root_fails() {
        let graph = ReactiveGraph::new();
        let scope = graph.create_scope();
        assert!(adaptive_dpr(&scope).is_err());
        assert!(adaptive_events(&scope).is_err());
    }
}
