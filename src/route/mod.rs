//! Radix-tree router.
//!
//! Routes are registered as a method plus a path pattern made of literal
//! segments and `{name}` dynamic segments, and resolved back to a handler
//! plus the bound dynamic values. Internally this is a compressed trie:
//! sibling literal runs that share a prefix are split on insert so lookup
//! never has to try more than one static child before falling back to the
//! node's (at most one) dynamic child.

use crate::{errors::RouteError, http::types::Method};
use std::collections::HashMap;

/// Dynamic segment values bound during a successful [`Tree::find`].
///
/// Preserves insertion order; lookups are linear, which is fine for the
/// handful of path parameters a single route pattern typically carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    bindings: Vec<(String, String)>,
}

impl Params {
    fn push(&mut self, name: String, value: String) {
        self.bindings.push((name, value));
    }

    /// Returns the value bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

struct Node<H> {
    prefix: String,
    values: HashMap<Method, H>,
    children: HashMap<u8, Node<H>>,
    dynamic_child: Option<Box<Node<H>>>,
    param_name: Option<String>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Self {
            prefix: String::new(),
            values: HashMap::new(),
            children: HashMap::new(),
            dynamic_child: None,
            param_name: None,
        }
    }
}

/// A radix tree mapping `(method, path)` to a handler of type `H`.
pub struct Tree<H> {
    root: Node<H>,
}

impl<H> Tree<H> {
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Registers `handler` for `method` at `path`.
    ///
    /// `path` segments wrapped in `{}` bind a named parameter; all other
    /// segments are matched literally. Returns an error if the pattern is
    /// malformed, a node already binds a differently-named parameter, or
    /// the same `(method, path)` pair is registered twice.
    pub fn insert(&mut self, method: Method, path: &str, handler: H) -> Result<(), RouteError> {
        let normalized = normalize_path(path);

        if normalized == "/" {
            if self.root.values.contains_key(&method) {
                return Err(RouteError::DuplicateRoute);
            }
            self.root.values.insert(method, handler);
            return Ok(());
        }

        let mut rest = normalized.strip_prefix('/').unwrap_or(&normalized);
        let mut current = &mut self.root;

        loop {
            if rest.is_empty() {
                if current.values.contains_key(&method) {
                    return Err(RouteError::DuplicateRoute);
                }
                current.values.insert(method, handler);
                return Ok(());
            }

            if rest.starts_with('{') {
                let seg_end = rest.find('/').unwrap_or(rest.len());
                let segment = &rest[..seg_end];

                if !segment.ends_with('}') {
                    return Err(RouteError::MalformedSegment);
                }
                let param_name = &segment[1..segment.len() - 1];
                if param_name.is_empty() {
                    return Err(RouteError::EmptyParamName);
                }

                match &current.param_name {
                    Some(existing) if existing != param_name => {
                        return Err(RouteError::AmbiguousParam {
                            existing: existing.clone(),
                            new: param_name.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => current.param_name = Some(param_name.to_string()),
                }

                if current.dynamic_child.is_none() {
                    current.dynamic_child = Some(Box::new(Node::new()));
                }
                current = current.dynamic_child.as_deref_mut().unwrap();

                let tail = &rest[seg_end..];
                rest = tail.strip_prefix('/').unwrap_or(tail);
                continue;
            }

            let first_byte = rest.as_bytes()[0];

            if !current.children.contains_key(&first_byte) {
                let dyn_pos = rest.find('{');
                let prefix = match dyn_pos {
                    Some(pos) => &rest[..pos],
                    None => rest,
                };
                let consumed = prefix.len();

                let mut child = Node::new();
                child.prefix = prefix.to_string();
                current.children.insert(first_byte, child);

                current = current.children.get_mut(&first_byte).unwrap();
                rest = &rest[consumed..];
                continue;
            }

            let lcp = longest_common_prefix(rest, &current.children[&first_byte].prefix);
            let child_prefix_len = current.children[&first_byte].prefix.len();

            if lcp < child_prefix_len {
                let child = current.children.get_mut(&first_byte).unwrap();

                let mut split_node = Node::new();
                split_node.prefix = child.prefix[lcp..].to_string();
                split_node.children = std::mem::take(&mut child.children);
                split_node.values = std::mem::take(&mut child.values);
                split_node.dynamic_child = child.dynamic_child.take();
                split_node.param_name = child.param_name.take();

                child.prefix.truncate(lcp);

                let split_byte = split_node.prefix.as_bytes()[0];
                child.children.insert(split_byte, split_node);
            }

            rest = &rest[lcp..];
            current = current.children.get_mut(&first_byte).unwrap();
        }
    }

    /// Resolves `(method, path)` to the registered handler and the dynamic
    /// values bound along the way. Returns `None` both when no route
    /// matches the path and when the path matches but not for `method` -
    /// callers map the latter to `404` rather than `405`, since a route
    /// tree holding only `GET /x` and `POST /y` has no notion that `/x`
    /// "exists" for `POST`.
    pub fn find(&self, method: Method, path: &str) -> Option<(&H, Params)> {
        let normalized = normalize_path(path);
        let mut params = Params::default();

        if normalized == "/" {
            return self.root.values.get(&method).map(|h| (h, params));
        }

        let mut rest = normalized.strip_prefix('/').unwrap_or(&normalized);
        let mut current = &self.root;

        loop {
            if rest.is_empty() {
                return current.values.get(&method).map(|h| (h, params));
            }

            let first_byte = rest.as_bytes()[0];

            if let Some(child) = current.children.get(&first_byte) {
                if rest.starts_with(child.prefix.as_str()) {
                    let tail = &rest[child.prefix.len()..];
                    rest = tail.strip_prefix('/').unwrap_or(tail);
                    current = child;
                    continue;
                }
            }

            if let Some(dynamic_child) = current.dynamic_child.as_deref() {
                let seg_end = rest.find('/').unwrap_or(rest.len());
                let value = &rest[..seg_end];

                if !value.is_empty() {
                    let name = current.param_name.clone().unwrap_or_default();
                    params.push(name, value.to_string());

                    let tail = &rest[seg_end..];
                    rest = tail.strip_prefix('/').unwrap_or(tail);
                    current = dynamic_child;
                    continue;
                }
            }

            return None;
        }
    }
}

impl<H> Default for Tree<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn longest_common_prefix(a: &str, b: &str) -> usize {
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .take_while(|(x, y)| x == y)
        .count()
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if path.len() > 1 && path.ends_with('/') {
        return path[..path.len() - 1].to_string();
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str, handler: &'static str) -> (Method, &'static str, &'static str) {
        (Method::Get, path, handler)
    }

    #[test]
    fn static_route_round_trips() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users", "list_users").unwrap();
        tree.insert(Method::Post, "/users", "create_user").unwrap();

        let (handler, params) = tree.find(Method::Get, "/users").unwrap();
        assert_eq!(*handler, "list_users");
        assert!(params.is_empty());

        let (handler, _) = tree.find(Method::Post, "/users").unwrap();
        assert_eq!(*handler, "create_user");
    }

    #[test]
    fn root_route_matches_bare_slash() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/", "index").unwrap();

        assert_eq!(*tree.find(Method::Get, "/").unwrap().0, "index");
        assert!(tree.find(Method::Post, "/").is_none());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/", "list_users").unwrap();

        assert_eq!(*tree.find(Method::Get, "/users").unwrap().0, "list_users");
        assert_eq!(*tree.find(Method::Get, "/users/").unwrap().0, "list_users");
    }

    #[test]
    fn dynamic_segment_binds_param() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/{id}", "get_user").unwrap();

        let (handler, params) = tree.find(Method::Get, "/users/42").unwrap();
        assert_eq!(*handler, "get_user");
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn multiple_dynamic_segments_bind_in_order() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/{user_id}/posts/{post_id}", "get_post")
            .unwrap();

        let (handler, params) = tree.find(Method::Get, "/users/7/posts/99").unwrap();
        assert_eq!(*handler, "get_post");
        assert_eq!(params.get("user_id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
    }

    #[test]
    fn static_sibling_forces_prefix_split() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/team", "team_index").unwrap();
        tree.insert(Method::Get, "/teapot", "teapot_index").unwrap();

        assert_eq!(*tree.find(Method::Get, "/team").unwrap().0, "team_index");
        assert_eq!(*tree.find(Method::Get, "/teapot").unwrap().0, "teapot_index");
        assert!(tree.find(Method::Get, "/tea").is_none());
    }

    #[test]
    fn static_child_wins_over_dynamic_sibling() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/me", "current_user").unwrap();
        tree.insert(Method::Get, "/users/{id}", "get_user").unwrap();

        assert_eq!(*tree.find(Method::Get, "/users/me").unwrap().0, "current_user");
        assert_eq!(*tree.find(Method::Get, "/users/42").unwrap().0, "get_user");
    }

    #[test]
    fn empty_dynamic_segment_does_not_match() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/{id}", "get_user").unwrap();

        assert!(tree.find(Method::Get, "/users/").is_none());
    }

    #[test]
    fn unknown_path_is_not_found() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users", "list_users").unwrap();

        assert!(tree.find(Method::Get, "/orders").is_none());
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users", "list_users").unwrap();

        let err = tree.insert(Method::Get, "/users", "other").unwrap_err();
        assert!(matches!(err, RouteError::DuplicateRoute));
    }

    #[test]
    fn ambiguous_param_name_is_rejected() {
        let mut tree = Tree::new();
        tree.insert(Method::Get, "/users/{id}", "get_user").unwrap();

        let err = tree
            .insert(Method::Get, "/users/{user_id}", "get_user_alt")
            .unwrap_err();
        assert!(matches!(err, RouteError::AmbiguousParam { .. }));
    }

    #[test]
    fn malformed_segment_is_rejected() {
        let mut tree: Tree<&'static str> = Tree::new();
        let err = tree.insert(Method::Get, "/users/{id", "get_user").unwrap_err();
        assert!(matches!(err, RouteError::MalformedSegment));
    }

    #[test]
    fn empty_param_name_is_rejected() {
        let mut tree: Tree<&'static str> = Tree::new();
        let err = tree.insert(Method::Get, "/users/{}", "get_user").unwrap_err();
        assert!(matches!(err, RouteError::EmptyParamName));
    }

    #[test]
    fn table_driven_static_routes() {
        let routes = [
            get("/a", "a"),
            get("/ab", "ab"),
            get("/abc", "abc"),
            get("/b", "b"),
        ];

        let mut tree = Tree::new();
        for (method, path, handler) in routes {
            tree.insert(method, path, handler).unwrap();
        }

        for (method, path, handler) in routes {
            assert_eq!(*tree.find(method, path).unwrap().0, handler);
        }
    }
}
