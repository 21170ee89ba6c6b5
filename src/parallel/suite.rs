use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ExecutionError;
use crate::context::ThreadContext;
use crate::failure::TestFailure;
use crate::lifecycle::RetryPolicy;

/// Executable body of a test method, or a class-level setup hook.
pub type TestBody = Arc<dyn Fn(&TestInvocation) -> Result<(), TestFailure> + Send + Sync>;

/// What a test body receives: its diagnostic context and parameters.
#[derive(Debug, Clone)]
pub struct TestInvocation {
    context: ThreadContext,
    parameters: BTreeMap<String, String>,
    attempt: u32,
}

impl TestInvocation {
    pub fn new(context: ThreadContext, parameters: BTreeMap<String, String>, attempt: u32) -> Self {
        Self {
            context,
            parameters,
            attempt,
        }
    }

    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Zero for the first run, incremented per retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Descriptor of one test method to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMethod {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Lower runs first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides the configured retry policy.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Runner time limit; a body that overruns it fails as timed out.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

fn enabled_by_default() -> bool {
    true
}

impl TestMethod {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            parameters: BTreeMap::new(),
            priority: 0,
            groups: Vec::new(),
            enabled: true,
            description: None,
            retry: None,
            timeout: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `Class.method`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

impl fmt::Display for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)
    }
}

/// A named collection of test methods with shared parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub id: String,
    pub name: String,
    pub tests: Vec<TestMethod>,
    /// Defaults for every test; a method's own parameters win.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            tests: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_test(mut self, test: TestMethod) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_tests(mut self, tests: impl IntoIterator<Item = TestMethod>) -> Self {
        self.tests.extend(tests);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Enabled tests in submission order: ascending priority, ties keep
    /// declaration order.
    pub fn scheduled_tests(&self) -> Vec<&TestMethod> {
        let mut tests: Vec<&TestMethod> = self.tests.iter().filter(|t| t.enabled).collect();
        tests.sort_by_key(|t| t.priority);
        tests
    }

    pub fn disabled_tests(&self) -> impl Iterator<Item = &TestMethod> {
        self.tests.iter().filter(|t| !t.enabled)
    }

    /// Suite parameters overlaid with the method's own.
    pub fn parameters_for(&self, test: &TestMethod) -> BTreeMap<String, String> {
        let mut merged = self.parameters.clone();
        merged.extend(test.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Maps `(class, method)` to executable test bodies.
#[derive(Default, Clone)]
pub struct TestRegistry {
    tests: HashMap<(String, String), TestBody>,
    setups: HashMap<String, TestBody>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, method_name: impl Into<String>, body: F)
    where
        F: Fn(&TestInvocation) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.tests
            .insert((class_name.into(), method_name.into()), Arc::new(body));
    }

    /// Hook run before every test method of `class_name`. A failing setup
    /// fails the test.
    pub fn register_setup<F>(&mut self, class_name: impl Into<String>, setup: F)
    where
        F: Fn(&TestInvocation) -> Result<(), TestFailure> + Send + Sync + 'static,
    {
        self.setups.insert(class_name.into(), Arc::new(setup));
    }

    pub fn resolve(&self, class_name: &str, method_name: &str) -> Result<TestBody, ExecutionError> {
        self.tests
            .get(&(class_name.to_string(), method_name.to_string()))
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownTest {
                class: class_name.to_string(),
                method: method_name.to_string(),
            })
    }

    pub fn setup_for(&self, class_name: &str) -> Option<TestBody> {
        self.setups.get(class_name).cloned()
    }

    pub fn contains(&self, class_name: &str, method_name: &str) -> bool {
        self.tests
            .contains_key(&(class_name.to_string(), method_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

impl fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .tests
            .keys()
            .map(|(class, method)| format!("{}.{}", class, method))
            .collect();
        names.sort();
        f.debug_struct("TestRegistry")
            .field("tests", &names)
            .field("setups", &self.setups.len())
            .finish()
    }
}
