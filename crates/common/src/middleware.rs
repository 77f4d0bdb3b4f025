//! Decorator composition.
//!
//! Stores, publishers and handlers are all wrapped the same way: an ordered
//! list of decorator constructors is folded over the target so that the first
//! entry ends up outermost. `chain(target, [a, b, c])` yields `a(b(c(target)))`.

/// A decorator constructor.
pub type Middleware<T> = Box<dyn FnOnce(T) -> T + Send>;

/// Wraps `target` with every middleware, first in the list outermost.
pub fn chain<T>(target: T, middlewares: impl IntoIterator<Item = Middleware<T>>) -> T {
    let middlewares: Vec<Middleware<T>> = middlewares.into_iter().collect();
    middlewares
        .into_iter()
        .rev()
        .fold(target, |inner, middleware| middleware(inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &'static str) -> Middleware<String> {
        Box::new(move |inner| format!("{name}({inner})"))
    }

    #[test]
    fn first_middleware_is_outermost() {
        let wrapped = chain("target".to_string(), [tag("A"), tag("B"), tag("C")]);
        assert_eq!(wrapped, "A(B(C(target)))");
    }

    #[test]
    fn empty_chain_returns_target() {
        let wrapped = chain("target".to_string(), Vec::new());
        assert_eq!(wrapped, "target");
    }
}
