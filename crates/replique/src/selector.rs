//! Memoized selectors
//!
//! A selector derives a value from state. [`create_selector`] composes input
//! selectors and a projector, each behind its own single-slot cache keyed by
//! reference equality of the arguments. Because unchanged slices keep their
//! identity across dispatches, an unrelated dispatch is a cache hit.
//!
//! Selectors and projectors may return a pending value; a composed selector
//! with any pending input returns a pending aggregate that resolves all
//! inputs and then applies the projector.
//!
//! ```ignore
//! let visible = create_selector(
//!     vec![InputSelector::slice("todos"), InputSelector::slice("filter")],
//!     Some(Projector::new(|values| filter_todos(&values[0], &values[1]).into())),
//!     SelectorOptions::default(),
//! )?;
//! let todos = visible.select(&store.get_state()).resolve().await;
//! ```

use crate::error::StoreError;
use crate::state::State;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::iter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The result of a selector: a state now, or one that will be available later
#[derive(Clone)]
pub enum Selected {
    Ready(State),
    Pending(Shared<BoxFuture<'static, State>>),
}

impl Selected {
    pub fn ready(state: impl Into<State>) -> Self {
        Selected::Ready(state.into())
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = State> + Send + 'static,
    {
        Selected::Pending(future.boxed().shared())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Selected::Pending(_))
    }

    /// The state, if already available
    pub fn now(&self) -> Option<State> {
        match self {
            Selected::Ready(state) => Some(state.clone()),
            Selected::Pending(future) => future.peek().cloned(),
        }
    }

    pub async fn resolve(self) -> State {
        match self {
            Selected::Ready(state) => state,
            Selected::Pending(future) => future.await,
        }
    }

    /// Same state node, or same pending computation
    pub fn ptr_eq(&self, other: &Selected) -> bool {
        match (self, other) {
            (Selected::Ready(a), Selected::Ready(b)) => a.ptr_eq(b),
            (Selected::Pending(a), Selected::Pending(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<State> for Selected {
    fn from(state: State) -> Self {
        Selected::Ready(state)
    }
}

impl fmt::Debug for Selected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selected::Ready(state) => f.debug_tuple("Ready").field(state).finish(),
            Selected::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Same length and each position reference-equal
pub fn shallow_equal(a: &[State], b: &[State]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.ptr_eq(b))
}

struct MemoEntry {
    args: Vec<State>,
    result: Selected,
}

/// Single-slot cache around `func`
pub struct Memoized<F> {
    func: F,
    enabled: bool,
    cache: Mutex<Option<MemoEntry>>,
}

impl<F> Memoized<F>
where
    F: Fn(&[State]) -> Selected,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            enabled: true,
            cache: Mutex::new(None),
        }
    }

    /// Same interface, never caches
    pub fn passthrough(func: F) -> Self {
        Self {
            enabled: false,
            ..Self::new(func)
        }
    }

    fn cache(&self) -> MutexGuard<'_, Option<MemoEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn call(&self, args: &[State]) -> Selected {
        if !self.enabled {
            return (self.func)(args);
        }
        if let Some(entry) = self.cache().as_ref() {
            if shallow_equal(&entry.args, args) {
                return entry.result.clone();
            }
        }

        let result = (self.func)(args);
        *self.cache() = Some(MemoEntry {
            args: args.to_vec(),
            result: result.clone(),
        });
        result
    }

    /// Forget the cached call
    pub fn release(&self) {
        self.cache().take();
    }

    pub fn is_primed(&self) -> bool {
        self.cache().is_some()
    }
}

type SelectFn = Arc<dyn Fn(&State, Option<&State>) -> Selected + Send + Sync>;
type ProjectFn = Arc<dyn Fn(&[State], Option<&State>) -> Selected + Send + Sync>;
type MemoFn = Box<dyn Fn(&[State]) -> Selected + Send + Sync>;

/// One input of a composed selector
#[derive(Clone)]
pub struct InputSelector {
    select: SelectFn,
    nested: Option<Selector>,
}

impl InputSelector {
    pub fn new<F>(select: F) -> Self
    where
        F: Fn(&State) -> Selected + Send + Sync + 'static,
    {
        Self::with_props(move |state, _| select(state))
    }

    /// Input that also sees the props passed to `select_with_props`
    pub fn with_props<F>(select: F) -> Self
    where
        F: Fn(&State, Option<&State>) -> Selected + Send + Sync + 'static,
    {
        Self {
            select: Arc::new(select),
            nested: None,
        }
    }

    /// The named slice of the state, or `null` when absent
    pub fn slice(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |state| state.get(&key).cloned().unwrap_or_else(State::null).into())
    }
}

impl From<Selector> for InputSelector {
    fn from(selector: Selector) -> Self {
        let inner = selector.clone();
        Self {
            select: Arc::new(move |state: &State, props: Option<&State>| inner.run(state, props)),
            nested: Some(selector),
        }
    }
}

/// Combines resolved input values into the derived value
#[derive(Clone)]
pub struct Projector(ProjectFn);

impl Projector {
    pub fn new<F>(project: F) -> Self
    where
        F: Fn(&[State]) -> Selected + Send + Sync + 'static,
    {
        Self::with_props(move |values, _| project(values))
    }

    pub fn with_props<F>(project: F) -> Self
    where
        F: Fn(&[State], Option<&State>) -> Selected + Send + Sync + 'static,
    {
        Projector(Arc::new(project))
    }
}

/// Which parts of a composed selector get a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorOptions {
    pub memoize_selectors: bool,
    pub memoize_projector: bool,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            memoize_selectors: true,
            memoize_projector: true,
        }
    }
}

fn memoize(func: MemoFn, enabled: bool) -> Memoized<MemoFn> {
    if enabled {
        Memoized::new(func)
    } else {
        Memoized::passthrough(func)
    }
}

struct Input {
    memo: Memoized<MemoFn>,
    nested: Option<Selector>,
}

struct SelectorInner {
    inputs: Vec<Input>,
    projector: Option<Arc<Memoized<MemoFn>>>,
}

/// A composed, memoized selector
#[derive(Clone)]
pub struct Selector {
    inner: Arc<SelectorInner>,
}

/// Compose `inputs` and an optional `projector` into a [`Selector`]
///
/// Without a projector exactly one input is required; its value is passed
/// through.
pub fn create_selector(
    inputs: Vec<InputSelector>,
    projector: Option<Projector>,
    options: SelectorOptions,
) -> Result<Selector, StoreError> {
    if projector.is_none() && inputs.len() != 1 {
        return Err(StoreError::AmbiguousSelector { inputs: inputs.len() });
    }

    let arity = inputs.len();
    let inputs = inputs
        .into_iter()
        .map(|input| {
            let select = input.select;
            // args: [state] or [state, props]
            let func: MemoFn = Box::new(move |args: &[State]| match args {
                [state, props] => select(state, Some(props)),
                [state] => select(state, None),
                _ => Selected::Ready(State::null()),
            });
            Input {
                memo: memoize(func, options.memoize_selectors),
                nested: input.nested,
            }
        })
        .collect();

    let projector = projector.map(|Projector(project)| {
        // args: the input values, then props if any
        let func: MemoFn = Box::new(move |args: &[State]| {
            let (values, props) = args.split_at(arity.min(args.len()));
            project(values, props.first())
        });
        Arc::new(memoize(func, options.memoize_projector))
    });

    Ok(Selector {
        inner: Arc::new(SelectorInner { inputs, projector }),
    })
}

impl Selector {
    pub fn select(&self, state: &State) -> Selected {
        self.run(state, None)
    }

    /// Select with props; props are part of every cache key
    pub fn select_with_props(&self, state: &State, props: &State) -> Selected {
        self.run(state, Some(props))
    }

    fn run(&self, state: &State, props: Option<&State>) -> Selected {
        let args: Vec<State> = iter::once(state.clone()).chain(props.cloned()).collect();
        let results: Vec<Selected> = self.inner.inputs.iter().map(|input| input.memo.call(&args)).collect();

        let Some(projector) = &self.inner.projector else {
            return results
                .into_iter()
                .next()
                .unwrap_or_else(|| Selected::Ready(State::null()));
        };

        if !results.iter().any(Selected::is_pending) {
            let values: Vec<State> = results.into_iter().filter_map(|r| r.now()).chain(props.cloned()).collect();
            return projector.call(&values);
        }

        let projector = projector.clone();
        let props = props.cloned();
        Selected::pending(async move {
            let values: Vec<State> = join_all(results.into_iter().map(Selected::resolve))
                .await
                .into_iter()
                .chain(props)
                .collect();
            projector.call(&values).resolve().await
        })
    }

    /// Clear every cache of this selector, its inputs and nested selectors
    pub fn release(&self) {
        for input in &self.inner.inputs {
            input.memo.release();
            if let Some(nested) = &input.nested {
                nested.release();
            }
        }
        if let Some(projector) = &self.inner.projector {
            projector.release();
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("inputs", &self.inner.inputs.len())
            .field("projector", &self.inner.projector.is_some())
            .field(
                "primed",
                &self.inner.projector.as_ref().is_some_and(|memo| memo.is_primed()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_slice(key: &'static str, calls: Arc<AtomicUsize>) -> InputSelector {
        InputSelector::new(move |state| {
            calls.fetch_add(1, Ordering::SeqCst);
            state.get(key).cloned().unwrap_or_else(State::null).into()
        })
    }

    fn sum(calls: Arc<AtomicUsize>) -> Projector {
        Projector::new(move |values| {
            calls.fetch_add(1, Ordering::SeqCst);
            let total: i64 = values.iter().filter_map(|v| v.value()).filter_map(|v| v.as_i64()).sum();
            State::leaf(total).into()
        })
    }

    #[test]
    fn test_shallow_equal() {
        let a = State::leaf(1);
        let b = State::leaf(1);
        assert!(shallow_equal(&[a.clone()], &[a.clone()]));
        assert!(!shallow_equal(&[a.clone()], &[b]));
        assert!(!shallow_equal(&[a.clone()], &[a.clone(), a]));
    }

    #[test]
    fn test_memoized_single_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new(move |args: &[State]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Selected::Ready(args[0].clone())
        });
        let a = State::leaf(1);
        let b = State::leaf(2);

        assert!(!memo.is_primed());
        memo.call(&[a.clone()]);
        memo.call(&[a.clone()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        memo.call(&[b]);
        memo.call(&[a.clone()]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        memo.release();
        assert!(!memo.is_primed());
        memo.call(&[a]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cached_until_release() {
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let p_calls = Arc::new(AtomicUsize::new(0));
        let selector = create_selector(
            vec![counted_slice("a", a_calls.clone()), counted_slice("b", b_calls.clone())],
            Some(sum(p_calls.clone())),
            SelectorOptions::default(),
        )
        .unwrap();
        let state = State::tree([("a", State::leaf(1)), ("b", State::leaf(2))]);

        let first = selector.select(&state);
        let second = selector.select(&state);
        assert_eq!(first.now().unwrap().to_json(), json!(3));
        assert!(first.ptr_eq(&second));
        for calls in [&a_calls, &b_calls, &p_calls] {
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        assert!(format!("{selector:?}").contains("primed: true"));
        selector.release();
        assert!(format!("{selector:?}").contains("primed: false"));
        selector.select(&state);
        for calls in [&a_calls, &b_calls, &p_calls] {
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn test_unchanged_inputs_skip_projector() {
        let p_calls = Arc::new(AtomicUsize::new(0));
        let selector = create_selector(
            vec![InputSelector::slice("a")],
            Some(sum(p_calls.clone())),
            SelectorOptions::default(),
        )
        .unwrap();
        let a = State::leaf(5);
        let before = State::tree([("a", a.clone()), ("other", State::leaf(0))]);
        let after = before.with_slice("other", State::leaf(1));

        selector.select(&before);
        let result = selector.select(&after);
        assert_eq!(result.now().unwrap().to_json(), json!(5));
        assert_eq!(p_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_without_memoization() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = create_selector(
            vec![counted_slice("a", calls.clone())],
            None,
            SelectorOptions {
                memoize_selectors: false,
                memoize_projector: false,
            },
        )
        .unwrap();
        let state = State::tree([("a", State::leaf(1))]);
        selector.select(&state);
        selector.select(&state);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_projector_required_for_many_inputs() {
        let err = create_selector(
            vec![InputSelector::slice("a"), InputSelector::slice("b")],
            None,
            SelectorOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousSelector { inputs: 2 }));
        assert!(err.is_configuration());

        let err = create_selector(Vec::new(), None, SelectorOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousSelector { inputs: 0 }));
    }

    #[test]
    fn test_single_input_passes_through() {
        let selector = create_selector(vec![InputSelector::slice("a")], None, SelectorOptions::default()).unwrap();
        let a = State::leaf("x");
        let state = State::tree([("a", a.clone())]);
        assert!(selector.select(&state).now().unwrap().ptr_eq(&a));
    }

    #[test]
    fn test_props_are_part_of_the_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let item = InputSelector::with_props(move |state, props| {
            counter.fetch_add(1, Ordering::SeqCst);
            let key = props.and_then(|p| p.value()).and_then(|v| v.as_str()).unwrap_or_default();
            state.get(key).cloned().unwrap_or_else(State::null).into()
        });
        let selector = create_selector(vec![item], None, SelectorOptions::default()).unwrap();
        let state = State::tree([("a", State::leaf(1)), ("b", State::leaf(2))]);
        let a = State::leaf("a");
        let b = State::leaf("b");

        assert_eq!(selector.select_with_props(&state, &a).now().unwrap().to_json(), json!(1));
        assert_eq!(selector.select_with_props(&state, &a).now().unwrap().to_json(), json!(1));
        assert_eq!(selector.select_with_props(&state, &b).now().unwrap().to_json(), json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_cascades_to_nested() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = create_selector(vec![counted_slice("a", calls.clone())], None, SelectorOptions::default()).unwrap();
        let outer = create_selector(
            vec![inner.into(), InputSelector::slice("b")],
            Some(sum(Arc::new(AtomicUsize::new(0)))),
            SelectorOptions::default(),
        )
        .unwrap();
        let state = State::tree([("a", State::leaf(1)), ("b", State::leaf(2))]);

        assert_eq!(outer.select(&state).now().unwrap().to_json(), json!(3));
        outer.release();
        outer.select(&state);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pending_input_gives_pending_aggregate() {
        let p_calls = Arc::new(AtomicUsize::new(0));
        let remote = InputSelector::new(|_| {
            Selected::pending(async {
                tokio::task::yield_now().await;
                State::leaf(40)
            })
        });
        let selector = create_selector(
            vec![remote, InputSelector::slice("local")],
            Some(sum(p_calls.clone())),
            SelectorOptions::default(),
        )
        .unwrap();
        let state = State::tree([("local", State::leaf(2))]);

        let selected = selector.select(&state);
        assert!(selected.is_pending());
        assert_eq!(selected.clone().resolve().await.to_json(), json!(42));
        assert_eq!(selected.now().unwrap().to_json(), json!(42));

        // Memoized inputs return the same pending value, so the projector is
        // not run again for the same resolved values
        assert_eq!(selector.select(&state).resolve().await.to_json(), json!(42));
        assert_eq!(p_calls.load(Ordering::SeqCst), 1);
    }
}
