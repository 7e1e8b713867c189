//! Route table compilation and matching (spec `§4.1`).
//!
//! Mutations are copy-on-write: `RouteTable::add`/`remove` build a brand new
//! `CompiledTable` and swap it in under a single writer lock (`ArcSwap`-style via
//! `std::sync::RwLock<Arc<_>>`, matching the teacher's snapshot-and-swap pattern for its
//! provider cache).

use regex::Regex;
use std::sync::{Arc, RwLock};

use crate::error::RouteError;
use crate::types::RouteRule;

/// A route rule compiled to a matchable regex, with its tie-break sort key.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: RouteRule,
    pub regex: Regex,
    pub param_names: Vec<String>,
    pub segment_count: usize,
    pub literal_count: usize,
    pub insertion_order: usize,
}

/// An immutable, sorted snapshot of compiled rules. Readers hold one for the life of a
/// request; writers never mutate it in place.
#[derive(Debug, Clone, Default)]
pub struct CompiledTable {
    rules: Vec<Arc<CompiledRule>>,
}

impl CompiledTable {
    pub fn compile(rules: Vec<RouteRule>) -> Result<Self, RouteError> {
        let mut seen_tool_ids = std::collections::HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for (insertion_order, rule) in rules.into_iter().enumerate() {
            if !seen_tool_ids.insert(rule.tool_id.clone()) {
                return Err(RouteError::DuplicateToolId(rule.tool_id));
            }
            compiled.push(Arc::new(compile_one(rule, insertion_order)?));
        }
        compiled.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        Ok(Self { rules: compiled })
    }

    /// Returns the matched rule and extracted `:name` params, or `None`.
    pub fn match_route(&self, method: &str, path: &str) -> Option<(Arc<CompiledRule>, Vec<(String, String)>)> {
        let method = method.to_ascii_uppercase();
        for candidate in &self.rules {
            if candidate.rule.method_upper() != method {
                continue;
            }
            if let Some(caps) = candidate.regex.captures(path) {
                let params = candidate
                    .param_names
                    .iter()
                    .map(|name| {
                        (
                            name.clone(),
                            caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default(),
                        )
                    })
                    .collect();
                return Some((candidate.clone(), params));
            }
        }
        None
    }

    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn into_rules(self) -> Vec<RouteRule> {
        self.rules.into_iter().map(|c| c.rule.clone()).collect()
    }
}

fn sort_key(c: &CompiledRule) -> (usize, usize, std::cmp::Reverse<usize>) {
    // Sorted descending overall, so wrap insertion_order in Reverse to keep it ascending.
    (c.segment_count, c.literal_count, std::cmp::Reverse(c.insertion_order))
}

fn compile_one(rule: RouteRule, insertion_order: usize) -> Result<CompiledRule, RouteError> {
    if !rule.path.starts_with('/') {
        return Err(RouteError::InvalidPath(rule.path));
    }
    let mut param_names = Vec::new();
    let mut literal_count = 0usize;
    let segments: Vec<&str> = rule.path.trim_start_matches('/').split('/').collect();
    let segment_count = segments.len();
    let mut pattern = String::from("^");
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            pattern.push('/');
        }
        if let Some(name) = segment.strip_prefix(':') {
            pattern.push_str(&format!("(?P<{name}>[^/]+)"));
            param_names.push(name.to_string());
        } else {
            literal_count += 1;
            pattern.push_str(&regex::escape(segment));
        }
    }
    pattern.push('$');
    let regex = Regex::new(&pattern).map_err(|e| RouteError::InvalidPath(e.to_string()))?;
    Ok(CompiledRule {
        rule,
        regex,
        param_names,
        segment_count,
        literal_count,
        insertion_order,
    })
}

/// Something that keeps its own compiled view of the routes in sync with the main table
/// (spec `§4.5`/`§9`: the payment coordinator's internal route list, notified instead of
/// twin-written by the admin handlers).
pub trait RouteObserver: Send + Sync {
    fn on_route_added(&self, rule: &RouteRule);
    fn on_route_removed(&self, tool_id: &str);
}

/// The route table shared between the HTTP surface and the admin mutation endpoints.
pub struct RouteTable {
    current: RwLock<Arc<CompiledTable>>,
    observers: RwLock<Vec<Arc<dyn RouteObserver>>>,
}

impl RouteTable {
    pub fn new(initial: CompiledTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<CompiledTable> {
        self.current.read().expect("route table lock poisoned").clone()
    }

    /// Registers an observer notified on every subsequent `add`/`remove` (not replayed
    /// for routes already in the table — callers seed those themselves at construction).
    pub fn subscribe(&self, observer: Arc<dyn RouteObserver>) {
        self.observers.write().expect("observer list lock poisoned").push(observer);
    }

    fn notify_added(&self, rule: &RouteRule) {
        for observer in self.observers.read().expect("observer list lock poisoned").iter() {
            observer.on_route_added(rule);
        }
    }

    fn notify_removed(&self, tool_id: &str) {
        for observer in self.observers.read().expect("observer list lock poisoned").iter() {
            observer.on_route_removed(tool_id);
        }
    }

    /// Replaces a rule with the same `tool_id`, or appends it, rebuilding the whole table.
    pub fn add(&self, rule: RouteRule) -> Result<(), RouteError> {
        let mut guard = self.current.write().expect("route table lock poisoned");
        let mut rules = (**guard).clone().into_rules();
        rules.retain(|r| r.tool_id != rule.tool_id);
        rules.push(rule.clone());
        let recompiled = CompiledTable::compile(rules)?;
        *guard = Arc::new(recompiled);
        drop(guard);
        self.notify_added(&rule);
        Ok(())
    }

    pub fn remove(&self, tool_id: &str) -> Result<(), RouteError> {
        let mut guard = self.current.write().expect("route table lock poisoned");
        let mut rules = (**guard).clone().into_rules();
        let before = rules.len();
        rules.retain(|r| r.tool_id != tool_id);
        if rules.len() == before {
            return Err(RouteError::NotFound(tool_id.to_string()));
        }
        let recompiled = CompiledTable::compile(rules)?;
        *guard = Arc::new(recompiled);
        drop(guard);
        self.notify_removed(tool_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;

    fn rule(method: &str, path: &str, tool_id: &str) -> RouteRule {
        RouteRule {
            method: method.to_string(),
            path: path.to_string(),
            tool_id: tool_id.to_string(),
            price: "0.01".to_string(),
            provider: Provider {
                id: "p1".to_string(),
                backend_url: "https://example.com".to_string(),
                auth: None,
            },
            group: None,
            description: None,
            restricted: false,
            skip_ssrf: false,
        }
    }

    #[test]
    fn literal_wins_over_param_at_same_segment_count() {
        let table = CompiledTable::compile(vec![
            rule("GET", "/a/:y/:z", "param-route"),
            rule("GET", "/a/b/:x", "literal-route"),
        ])
        .unwrap();
        let (matched, params) = table.match_route("GET", "/a/b/c").unwrap();
        assert_eq!(matched.rule.tool_id, "literal-route");
        assert_eq!(params, vec![("x".to_string(), "c".to_string())]);
    }

    #[test]
    fn rejects_duplicate_tool_ids() {
        let err = CompiledTable::compile(vec![
            rule("GET", "/a", "dup"),
            rule("POST", "/b", "dup"),
        ])
        .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateToolId(_)));
    }

    #[test]
    fn method_is_case_insensitive_at_match_time() {
        let table = CompiledTable::compile(vec![rule("GET", "/x", "x")]).unwrap();
        assert!(table.match_route("get", "/x").is_some());
    }

    #[test]
    fn add_and_remove_are_copy_on_write() {
        let table = RouteTable::new(CompiledTable::default());
        table.add(rule("GET", "/a", "a")).unwrap();
        let snap1 = table.snapshot();
        assert_eq!(snap1.len(), 1);
        table.add(rule("GET", "/b", "b")).unwrap();
        assert_eq!(snap1.len(), 1, "earlier snapshot must be unaffected");
        let snap2 = table.snapshot();
        assert_eq!(snap2.len(), 2);
        table.remove("a").unwrap();
        assert_eq!(table.snapshot().len(), 1);
    }
}
