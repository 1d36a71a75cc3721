//! Key-expression matching.
//!
//! Key expressions are `/`-separated chunks. `*` matches exactly one
//! chunk, `**` matches any run of chunks including none. Two expressions
//! intersect when some concrete key matches both.

/// Returns `true` if `a` and `b` can match a common concrete key.
#[must_use]
pub fn key_expr_intersects(a: &str, b: &str) -> bool {
    let left: Vec<&str> = split_chunks(a);
    let right: Vec<&str> = split_chunks(b);
    chunks_intersect(&left, &right)
}

fn split_chunks(key_expr: &str) -> Vec<&str> {
    key_expr
        .trim_matches('/')
        .split('/')
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn chunks_intersect(a: &[&str], b: &[&str]) -> bool {
    match (a.split_first(), b.split_first()) {
        (None, None) => true,
        (Some((&"**", rest_a)), _) => {
            chunks_intersect(rest_a, b)
                || b.split_first()
                    .is_some_and(|(_, rest_b)| chunks_intersect(a, rest_b))
        }
        (_, Some((&"**", rest_b))) => {
            chunks_intersect(a, rest_b)
                || a.split_first()
                    .is_some_and(|(_, rest_a)| chunks_intersect(rest_a, b))
        }
        (Some((head_a, rest_a)), Some((head_b, rest_b))) => {
            chunk_matches(head_a, head_b) && chunks_intersect(rest_a, rest_b)
        }
        _ => false,
    }
}

fn chunk_matches(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_keys() {
        assert!(key_expr_intersects("a/b/c", "a/b/c"));
        assert!(!key_expr_intersects("a/b/c", "a/b"));
        assert!(!key_expr_intersects("a/b/c", "a/b/d"));
    }

    #[test]
    fn single_star_matches_one_chunk() {
        assert!(key_expr_intersects("a/*/c", "a/b/c"));
        assert!(!key_expr_intersects("a/*/c", "a/b/x/c"));
        assert!(!key_expr_intersects("a/*", "a"));
    }

    #[test]
    fn double_star_matches_any_run() {
        assert!(key_expr_intersects("**", "bubbaloop/local/m1/camera"));
        assert!(key_expr_intersects("a/**", "a"));
        assert!(key_expr_intersects("a/**", "a/b/c/d"));
        assert!(key_expr_intersects(
            "bubbaloop/**/schema",
            "bubbaloop/local/m1/weather/schema"
        ));
        assert!(!key_expr_intersects(
            "bubbaloop/**/schema",
            "bubbaloop/local/m1/weather/current"
        ));
    }

    #[test]
    fn wildcards_on_both_sides() {
        assert!(key_expr_intersects("bubbaloop/**", "**/schema"));
        assert!(key_expr_intersects("a/*/c", "a/**"));
    }
}
