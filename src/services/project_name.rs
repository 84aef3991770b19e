use crate::domain::{Clock, ProjectName, Scope};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Used when sanitizing leaves nothing.
pub const DEFAULT_PROJECT_NAME: &str = "testbox";
/// Prepended when the name would start with a separator.
const LEADING_TOKEN: &str = "tb";
/// Digits in the zero-padded microsecond timestamp that ends every name.
const MICROS_WIDTH: usize = 16;

// Breaks ties between allocations that land on the same microsecond.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Derives a compose project name per scope instance.
///
/// Names have the shape `<stack>-<scope>-<discriminator..>-<pid>-<seq>-<micros>`,
/// lowercased and restricted to `[a-z0-9][a-z0-9_-]*`. The timestamp is
/// fixed-width and last, so no name is a prefix of another.
#[derive(Debug, Clone)]
pub struct ProjectNameAllocator {
    clock: Arc<dyn Clock>,
}

impl ProjectNameAllocator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn allocate<S: AsRef<str>>(
        &self,
        base: &str,
        scope: Scope,
        discriminator: &[S],
    ) -> ProjectName {
        let mut parts = vec![base, scope.as_str()];
        parts.extend(
            discriminator
                .iter()
                .map(|part| part.as_ref())
                .filter(|part| !part.trim().is_empty()),
        );

        let prefix = sanitize(&parts.join("-"));
        let micros = self.clock.utc_now().timestamp_micros();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{prefix}-{}-{seq}-{micros:0width$}",
            std::process::id(),
            width = MICROS_WIDTH
        );

        ProjectName::new(name, format!("{prefix}-"))
    }
}

/// Rebuilds a `ProjectName` from a name produced by `allocate`, e.g. one
/// typed on the command line. Names without the allocation suffix are their
/// own scope prefix.
pub fn restore(name: &str) -> ProjectName {
    match name.rsplitn(4, '-').nth(3) {
        Some(prefix) if is_allocation_suffix(&name[prefix.len() + 1..]) => {
            ProjectName::new(name, format!("{prefix}-"))
        }
        _ => ProjectName::new(name, name),
    }
}

/// True when `rest` is exactly the `<pid>-<seq>-<micros>` tail `allocate`
/// appends after the scope prefix.
pub fn is_allocation_suffix(rest: &str) -> bool {
    fn digits(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
    }

    let mut parts = rest.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(pid), Some(seq), Some(micros), None) => {
            digits(pid) && digits(seq) && micros.len() == MICROS_WIDTH && digits(micros)
        }
        _ => false,
    }
}

/// Lowercases, replaces anything outside `[a-z0-9_-]` with `-`, collapses
/// separator runs, trims trailing separators and guarantees an alphanumeric
/// first character.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());

    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };

        if (c == '-' || c == '_') && out.ends_with(['-', '_']) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_end_matches(['-', '_']);
    if trimmed.is_empty() {
        return DEFAULT_PROJECT_NAME.to_string();
    }

    if trimmed.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        trimmed.to_string()
    } else {
        format!("{LEADING_TOKEN}{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::SystemClock;
    use crate::test_support::FakeClock;
    use std::collections::HashSet;
    use std::time::Duration;

    fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }

    #[test]
    fn sanitizes_invalid_characters() {
        assert_eq!(sanitize("My Stack/ClassA#method"), "my-stack-classa-method");
        assert_eq!(sanitize("feature//x"), "feature-x");
        assert_eq!(sanitize("a__b--c"), "a_b-c");
        assert_eq!(sanitize("Ünïcode"), "tb-n-code");
    }

    #[test]
    fn leading_separator_gets_token() {
        assert_eq!(sanitize("-web"), "tb-web");
        assert_eq!(sanitize("_web"), "tb_web");
        assert_eq!(sanitize("  api"), "tb-api");
    }

    #[test]
    fn empty_result_falls_back_to_default() {
        assert_eq!(sanitize(""), DEFAULT_PROJECT_NAME);
        assert_eq!(sanitize("---"), DEFAULT_PROJECT_NAME);
        assert_eq!(sanitize("!!"), DEFAULT_PROJECT_NAME);
    }

    #[test]
    fn allocation_has_scope_prefix_and_valid_shape() {
        let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
        let name = allocator.allocate("Web Stack", Scope::Method, &["ClassA", "methodX"]);

        assert!(name.as_str().starts_with("web-stack-method-classa-methodx-"));
        assert_eq!(name.scope_prefix(), "web-stack-method-classa-methodx-");
        assert!(name.as_str().starts_with(name.scope_prefix()));
        assert!(is_valid(name.as_str()), "invalid name {name}");
    }

    #[test]
    fn blank_discriminator_parts_are_skipped() {
        let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
        let name = allocator.allocate("db", Scope::Suite, &["", " "]);
        assert_eq!(name.scope_prefix(), "db-suite-");
    }

    #[test]
    fn allocations_one_millisecond_apart_differ() {
        let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
        let first = allocator.allocate("suite", Scope::Suite, &["ClassA", "methodX"]);
        std::thread::sleep(Duration::from_millis(1));
        let second = allocator.allocate("suite", Scope::Suite, &["ClassA", "methodX"]);

        assert_ne!(first, second);
        assert_eq!(first.scope_prefix(), second.scope_prefix());
    }

    #[test]
    fn restore_recovers_scope_prefix() {
        let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
        let allocated = allocator.allocate("stack", Scope::Class, &["OrdersIT"]);

        assert_eq!(restore(allocated.as_str()), allocated);
        assert_eq!(restore("handmade").scope_prefix(), "handmade");
        assert_eq!(restore("a-b-1-2").scope_prefix(), "a-b-1-2");
        assert_eq!(restore("a-b-1-2-3").scope_prefix(), "a-b-1-2-3");
    }

    #[test]
    fn allocation_suffix_must_match_exactly() {
        let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
        let name = allocator.allocate("stack", Scope::Class, &["ClassA", "test"]);
        let rest = &name.as_str()[name.scope_prefix().len()..];
        assert!(is_allocation_suffix(rest));

        // A longer discriminator under the same prefix is another scope.
        let nested = allocator.allocate("stack", Scope::Class, &["ClassA", "test[1]"]);
        assert!(nested.as_str().starts_with(name.scope_prefix()));
        assert!(!is_allocation_suffix(&nested.as_str()[name.scope_prefix().len()..]));

        assert!(!is_allocation_suffix("1-2-3"));
        assert!(!is_allocation_suffix("1-2-0000000000000003-x"));
        assert!(!is_allocation_suffix(""));
    }

    #[test]
    fn frozen_clock_still_yields_unique_names() {
        let clock = Arc::new(FakeClock::new());
        let allocator = ProjectNameAllocator::new(clock);

        let names: HashSet<String> = (0..50)
            .map(|_| {
                allocator
                    .allocate("stack", Scope::Method, &["C", "m"])
                    .as_str()
                    .to_string()
            })
            .collect();
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn concurrent_allocators_never_collide() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    let allocator = ProjectNameAllocator::new(Arc::new(SystemClock));
                    (0..25)
                        .map(|_| {
                            allocator
                                .allocate("stack", Scope::Method, &["C", "m"])
                                .as_str()
                                .to_string()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(all.insert(name), "duplicate project name");
            }
        }
        assert_eq!(all.len(), 200);
    }
}
