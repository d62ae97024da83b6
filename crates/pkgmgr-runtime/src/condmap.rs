//! Declarative mapping from internal conditions to the public condition set.
//!
//! The mapper is pure: it never reads clocks or shared state, so identical
//! inputs always produce identical outputs.

use pkgmgr_types::condition::{external, internal};
use pkgmgr_types::{Condition, ConditionStatus};

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    pub internal: &'a [Condition],
    /// Previously published external conditions.
    pub external: &'a [Condition],
    pub version_changed: bool,
}

impl Input<'_> {
    fn internal(&self, name: &str) -> Option<&Condition> {
        self.internal.iter().find(|c| c.name == name)
    }

    fn external(&self, name: &str) -> Option<&Condition> {
        self.external.iter().find(|c| c.name == name)
    }
}

/// Closed vocabulary of rule predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IsTrue(String),
    AnyFalse(Vec<String>),
    AllTrue(Vec<String>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    VersionChanged,
    ExtTrue(String),
    ExtPresent(String),
}

/// Outcome of a predicate: whether it matched and which internal condition
/// explains the match.
#[derive(Debug, Clone, Default, PartialEq)]
struct Match {
    matched: bool,
    source: Option<String>,
}

impl Match {
    fn yes(source: Option<String>) -> Self {
        Self {
            matched: true,
            source,
        }
    }

    fn no() -> Self {
        Self::default()
    }
}

impl Predicate {
    pub fn is_true(name: &str) -> Self {
        Predicate::IsTrue(name.to_string())
    }

    pub fn any_false(names: &[&str]) -> Self {
        Predicate::AnyFalse(names.iter().map(|s| s.to_string()).collect())
    }

    pub fn all_true(names: &[&str]) -> Self {
        Predicate::AllTrue(names.iter().map(|s| s.to_string()).collect())
    }

    pub fn not(pred: Predicate) -> Self {
        Predicate::Not(Box::new(pred))
    }

    pub fn ext_true(name: &str) -> Self {
        Predicate::ExtTrue(name.to_string())
    }

    pub fn ext_present(name: &str) -> Self {
        Predicate::ExtPresent(name.to_string())
    }

    pub fn matches(&self, input: &Input<'_>) -> bool {
        self.eval(input).matched
    }

    fn eval(&self, input: &Input<'_>) -> Match {
        match self {
            Predicate::IsTrue(name) => match input.internal(name) {
                Some(c) if c.is_true() => Match::yes(Some(name.clone())),
                _ => Match::no(),
            },
            Predicate::AnyFalse(names) => names
                .iter()
                .find(|n| input.internal(n).is_some_and(Condition::is_false))
                .map(|n| Match::yes(Some(n.clone())))
                .unwrap_or_default(),
            Predicate::AllTrue(names) => {
                if names.is_empty() {
                    return Match::no();
                }
                let all = names
                    .iter()
                    .all(|n| input.internal(n).is_some_and(Condition::is_true));
                if all {
                    Match::yes(names.last().cloned())
                } else {
                    Match::no()
                }
            }
            Predicate::And(preds) => {
                let mut source = None;
                for pred in preds {
                    let m = pred.eval(input);
                    if !m.matched {
                        return Match::no();
                    }
                    if m.source.is_some() {
                        source = m.source;
                    }
                }
                if preds.is_empty() {
                    Match::no()
                } else {
                    Match::yes(source)
                }
            }
            Predicate::Or(preds) => preds
                .iter()
                .map(|p| p.eval(input))
                .find(|m| m.matched)
                .unwrap_or_default(),
            Predicate::Not(pred) => {
                if pred.eval(input).matched {
                    Match::no()
                } else {
                    Match::yes(None)
                }
            }
            Predicate::VersionChanged => {
                if input.version_changed {
                    Match::yes(None)
                } else {
                    Match::no()
                }
            }
            Predicate::ExtTrue(name) => {
                if input.external(name).is_some_and(Condition::is_true) {
                    Match::yes(None)
                } else {
                    Match::no()
                }
            }
            Predicate::ExtPresent(name) => {
                if input.external(name).is_some() {
                    Match::yes(None)
                } else {
                    Match::no()
                }
            }
        }
    }
}

/// One mapping rule for an external condition type.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub kind: String,
    pub only_if: Option<Predicate>,
    pub false_if: Option<Predicate>,
    pub true_if: Option<Predicate>,
    pub sticky: bool,
}

impl Rule {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            only_if: None,
            false_if: None,
            true_if: None,
            sticky: false,
        }
    }

    pub fn only_if(mut self, pred: Predicate) -> Self {
        self.only_if = Some(pred);
        self
    }

    pub fn false_if(mut self, pred: Predicate) -> Self {
        self.false_if = Some(pred);
        self
    }

    pub fn true_if(mut self, pred: Predicate) -> Self {
        self.true_if = Some(pred);
        self
    }

    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }
}

enum Verdict {
    Skip,
    Keep,
    Set(Condition),
}

impl Rule {
    fn evaluate(&self, input: &Input<'_>) -> Verdict {
        if let Some(gate) = &self.only_if {
            if !gate.matches(input) {
                return Verdict::Skip;
            }
        }
        if self.sticky && input.external(&self.kind).is_some_and(Condition::is_true) {
            return Verdict::Keep;
        }
        if let Some(m) = self.false_if.as_ref().map(|p| p.eval(input)) {
            if m.matched {
                return Verdict::Set(self.output(ConditionStatus::False, m.source, input));
            }
        }
        if let Some(m) = self.true_if.as_ref().map(|p| p.eval(input)) {
            if m.matched {
                return Verdict::Set(self.output(ConditionStatus::True, m.source, input));
            }
        }
        Verdict::Keep
    }

    fn output(&self, status: ConditionStatus, source: Option<String>, input: &Input<'_>) -> Condition {
        let mut cond = Condition::new(self.kind.clone(), status);
        if let Some(src) = source.as_deref().and_then(|s| input.internal(s)) {
            cond.reason = src.reason.clone();
            cond.message = src.message.clone();
        }
        cond
    }
}

/// A rule corpus plus the version-commit predicate.
#[derive(Debug, Clone)]
pub struct Mapper {
    rules: Vec<Rule>,
    commit_if: Predicate,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new(default_rules(), default_commit_predicate())
    }
}

impl Mapper {
    pub fn new(rules: Vec<Rule>, commit_if: Predicate) -> Self {
        Self { rules, commit_if }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Derive the external conditions.
    ///
    /// For each type the first rule that does not skip decides. A "keep"
    /// re-emits the previous condition if there was one and emits nothing
    /// otherwise. Previous conditions of types no rule mentions are carried
    /// over unchanged.
    pub fn map(&self, input: &Input<'_>) -> Vec<Condition> {
        let mut out: Vec<Condition> = Vec::new();
        let mut decided: Vec<&str> = Vec::new();

        for rule in &self.rules {
            if decided.contains(&rule.kind.as_str()) {
                continue;
            }
            match rule.evaluate(input) {
                Verdict::Skip => {}
                Verdict::Keep => {
                    decided.push(&rule.kind);
                    if let Some(prev) = input.external(&rule.kind) {
                        out.push(prev.clone());
                    }
                }
                Verdict::Set(cond) => {
                    decided.push(&rule.kind);
                    out.push(cond);
                }
            }
        }

        // Types whose rules all skipped keep their previous value.
        for prev in input.external {
            if !out.iter().any(|c| c.name == prev.name) {
                out.push(prev.clone());
            }
        }
        out
    }

    /// Whether the applied version may be persisted to the public status.
    pub fn should_commit_version(&self, internal: &[Condition]) -> bool {
        self.commit_if.matches(&Input {
            internal,
            external: &[],
            version_changed: false,
        })
    }

    /// Pairs `(earlier, later)` of rule indices where `later` can never
    /// decide because `earlier` targets the same type and is gated at least
    /// as loosely.
    pub fn shadowed(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, earlier) in self.rules.iter().enumerate() {
            for (j, later) in self.rules.iter().enumerate().skip(i + 1) {
                if earlier.kind != later.kind {
                    continue;
                }
                let covers = match (&earlier.only_if, &later.only_if) {
                    (None, _) => true,
                    (Some(a), Some(b)) => a == b,
                    (Some(_), None) => false,
                };
                if covers {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }
}

/// Internal conditions that must all be True before a version is committed.
pub fn default_commit_predicate() -> Predicate {
    Predicate::all_true(&[
        internal::DOWNLOADED,
        internal::READY_ON_FILESYSTEM,
        internal::READY_IN_RUNTIME,
        internal::HELM_APPLIED,
        internal::READY_IN_CLUSTER,
    ])
}

pub fn default_rules() -> Vec<Rule> {
    let installed_steps = [
        internal::DOWNLOADED,
        internal::READY_ON_FILESYSTEM,
        internal::READY_IN_RUNTIME,
        internal::HOOKS_PROCESSED,
        internal::HELM_APPLIED,
        internal::READY_IN_CLUSTER,
    ];
    let degraded_checks = [
        internal::READY_IN_CLUSTER,
        internal::HOOKS_PROCESSED,
        internal::HELM_APPLIED,
    ];
    let update_steps = [
        internal::DOWNLOADED,
        internal::READY_ON_FILESYSTEM,
        internal::READY_IN_RUNTIME,
        internal::HELM_APPLIED,
        internal::READY_IN_CLUSTER,
    ];

    vec![
        Rule::new(external::INSTALLED)
            .sticky()
            .false_if(Predicate::any_false(&[
                internal::DOWNLOADED,
                internal::READY_ON_FILESYSTEM,
                internal::READY_IN_RUNTIME,
                internal::HELM_APPLIED,
            ]))
            .true_if(Predicate::all_true(&installed_steps)),
        // Unmet requirements only block the next version; they are reported
        // through Managed and leave Installed and Ready as they were.
        Rule::new(external::READY)
            .false_if(Predicate::any_false(&[
                internal::DOWNLOADED,
                internal::READY_ON_FILESYSTEM,
                internal::READY_IN_RUNTIME,
                internal::HOOKS_PROCESSED,
                internal::HELM_APPLIED,
                internal::READY_IN_CLUSTER,
                internal::SETTINGS_VALID,
            ]))
            .true_if(Predicate::all_true(&[
                internal::READY_IN_RUNTIME,
                internal::READY_IN_CLUSTER,
                internal::HELM_APPLIED,
                internal::SETTINGS_VALID,
            ])),
        Rule::new(external::PARTIALLY_DEGRADED)
            .only_if(Predicate::ext_true(external::INSTALLED))
            .false_if(Predicate::all_true(&degraded_checks))
            .true_if(Predicate::any_false(&degraded_checks)),
        Rule::new(external::UPDATE_INSTALLED)
            .only_if(Predicate::VersionChanged)
            .false_if(Predicate::Or(vec![
                Predicate::any_false(&update_steps),
                Predicate::not(Predicate::all_true(&update_steps)),
            ]))
            .true_if(Predicate::all_true(&update_steps)),
        Rule::new(external::MANAGED)
            .false_if(Predicate::any_false(&[internal::REQUIREMENTS_MET]))
            .true_if(Predicate::is_true(internal::REQUIREMENTS_MET)),
        Rule::new(external::CONFIGURATION_APPLIED)
            .false_if(Predicate::any_false(&[internal::SETTINGS_VALID]))
            .true_if(Predicate::is_true(internal::SETTINGS_VALID)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_internal_true() -> Vec<Condition> {
        internal::ALL.iter().map(|n| Condition::ok(*n)).collect()
    }

    fn set(conds: &mut [Condition], name: &str, to: Condition) {
        if let Some(c) = conds.iter_mut().find(|c| c.name == name) {
            *c = to;
        }
    }

    fn find<'a>(conds: &'a [Condition], name: &str) -> Option<&'a Condition> {
        conds.iter().find(|c| c.name == name)
    }

    #[test]
    fn healthy_package_is_installed_and_ready() {
        let mapper = Mapper::default();
        let internal = all_internal_true();
        let out = mapper.map(&Input {
            internal: &internal,
            external: &[],
            version_changed: false,
        });
        assert!(find(&out, external::INSTALLED).unwrap().is_true());
        assert!(find(&out, external::READY).unwrap().is_true());
        assert!(find(&out, external::MANAGED).unwrap().is_true());
        assert!(find(&out, external::CONFIGURATION_APPLIED).unwrap().is_true());
        assert!(find(&out, external::UPDATE_INSTALLED).is_none());
        // Installed was not True in the previous state, so the gate skipped.
        assert!(find(&out, external::PARTIALLY_DEGRADED).is_none());
        assert!(mapper.should_commit_version(&internal));
    }

    #[test]
    fn installed_is_sticky() {
        let mapper = Mapper::default();
        let mut internal = all_internal_true();
        set(
            &mut internal,
            internal::HELM_APPLIED,
            Condition::failed(internal::HELM_APPLIED, "HelmUpgradeFailed", "boom"),
        );
        let prev = vec![Condition::ok(external::INSTALLED).with_message("earlier")];
        let out = mapper.map(&Input {
            internal: &internal,
            external: &prev,
            version_changed: false,
        });
        let installed = find(&out, external::INSTALLED).unwrap();
        assert!(installed.is_true());
        assert_eq!(installed.message, "earlier");

        let ready = find(&out, external::READY).unwrap();
        assert!(ready.is_false());
        assert_eq!(ready.reason, "HelmUpgradeFailed");
        assert_eq!(ready.message, "boom");

        let degraded = find(&out, external::PARTIALLY_DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert!(!mapper.should_commit_version(&internal));
    }

    #[test]
    fn unmet_requirements_leave_installed_and_ready() {
        let mapper = Mapper::default();
        let mut internal = all_internal_true();
        set(
            &mut internal,
            internal::REQUIREMENTS_MET,
            Condition::failed(internal::REQUIREMENTS_MET, "RequirementsNotMet", "deckhouse too old"),
        );
        let prev = vec![Condition::ok(external::INSTALLED), Condition::ok(external::READY)];
        let out = mapper.map(&Input {
            internal: &internal,
            external: &prev,
            version_changed: false,
        });
        assert!(find(&out, external::INSTALLED).unwrap().is_true());
        assert!(find(&out, external::READY).unwrap().is_true());
        let managed = find(&out, external::MANAGED).unwrap();
        assert!(managed.is_false());
        assert_eq!(managed.message, "deckhouse too old");
    }

    #[test]
    fn keep_never_fabricates() {
        let mapper = Mapper::default();
        let internal: Vec<Condition> = internal::ALL.iter().map(|n| Condition::unknown(*n)).collect();
        let out = mapper.map(&Input {
            internal: &internal,
            external: &[],
            version_changed: false,
        });
        assert!(out.is_empty());
    }

    #[test]
    fn update_installed_tracks_version_change() {
        let mapper = Mapper::default();
        let mut internal = all_internal_true();
        set(&mut internal, internal::HELM_APPLIED, Condition::unknown(internal::HELM_APPLIED));
        let pending = mapper.map(&Input {
            internal: &internal,
            external: &[],
            version_changed: true,
        });
        assert!(find(&pending, external::UPDATE_INSTALLED).unwrap().is_false());

        let internal = all_internal_true();
        let done = mapper.map(&Input {
            internal: &internal,
            external: &pending,
            version_changed: true,
        });
        assert!(find(&done, external::UPDATE_INSTALLED).unwrap().is_true());
    }

    #[test]
    fn settings_failure_reaches_configuration_applied() {
        let mapper = Mapper::default();
        let mut internal = all_internal_true();
        set(
            &mut internal,
            internal::SETTINGS_VALID,
            Condition::failed(internal::SETTINGS_VALID, "SettingsInvalid", "replicas: must be integer"),
        );
        let out = mapper.map(&Input {
            internal: &internal,
            external: &[],
            version_changed: false,
        });
        let applied = find(&out, external::CONFIGURATION_APPLIED).unwrap();
        assert!(applied.is_false());
        assert_eq!(applied.message, "replicas: must be integer");
    }

    #[test]
    fn mapping_is_deterministic_and_idempotent() {
        let mapper = Mapper::default();
        let internal = all_internal_true();
        let input = Input {
            internal: &internal,
            external: &[],
            version_changed: false,
        };
        let first = mapper.map(&input);
        assert_eq!(first, mapper.map(&input));

        let second = mapper.map(&Input {
            internal: &internal,
            external: &first,
            version_changed: false,
        });
        let third = mapper.map(&Input {
            internal: &internal,
            external: &second,
            version_changed: false,
        });
        assert_eq!(second, third);
    }

    #[test]
    fn unknown_previous_types_are_carried_over() {
        let mapper = Mapper::new(vec![], default_commit_predicate());
        let prev = vec![Condition::ok("Custom")];
        let out = mapper.map(&Input {
            internal: &[],
            external: &prev,
            version_changed: false,
        });
        assert_eq!(out, prev);
    }

    #[test]
    fn combinator_sources() {
        let internal = vec![
            Condition::ok("A").with_reason("ra"),
            Condition::ok("B").with_reason("rb"),
            Condition::failed("C", "rc", ""),
        ];
        let input = Input {
            internal: &internal,
            external: &[],
            version_changed: false,
        };
        let and = Predicate::And(vec![Predicate::is_true("A"), Predicate::is_true("B")]);
        assert_eq!(and.eval(&input).source.as_deref(), Some("B"));
        let or = Predicate::Or(vec![Predicate::is_true("A"), Predicate::is_true("B")]);
        assert_eq!(or.eval(&input).source.as_deref(), Some("A"));
        let not = Predicate::not(Predicate::is_true("C"));
        assert_eq!(not.eval(&input), Match::yes(None));
        assert_eq!(
            Predicate::any_false(&["A", "C"]).eval(&input).source.as_deref(),
            Some("C")
        );
        assert!(!Predicate::all_true(&["A", "C"]).matches(&input));
    }

    #[test]
    fn default_corpus_has_no_shadowed_rules() {
        let mapper = Mapper::default();
        let shadowed = mapper.shadowed();
        for (earlier, later) in &shadowed {
            eprintln!(
                "warning: rule {later} ({}) is shadowed by rule {earlier}",
                mapper.rules()[*later].kind
            );
        }
        assert!(shadowed.is_empty());
    }

    #[test]
    fn shadowed_detects_duplicate_gates() {
        let mapper = Mapper::new(
            vec![
                Rule::new("X").true_if(Predicate::is_true("A")),
                Rule::new("X").only_if(Predicate::VersionChanged),
                Rule::new("Y").only_if(Predicate::VersionChanged),
                Rule::new("Y").only_if(Predicate::VersionChanged).sticky(),
            ],
            default_commit_predicate(),
        );
        assert_eq!(mapper.shadowed(), vec![(0, 1), (2, 3)]);
    }
}
