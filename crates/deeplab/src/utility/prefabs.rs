//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named builder for a [`Config`]; a [`PreFabMap`] is a
//! static table of them, searchable by name.

use burn::config::Config;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`].
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the config prefab.
    pub name: &'static str,

    /// Description of the config prefab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }

    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(self.builder),
        }
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`Config`] well-known prefab, with an owned builder.
///
/// Unlike [`StaticPreFabConfig`], the builder may capture state; see
/// [`PreFabConfig::map`].
pub struct PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the config prefab.
    pub name: String,

    /// Description of the config prefab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{type_name}>"));
        handle
            .field("name", &self.name)
            .field("description", &self.description);
        if pretty {
            handle.field("config", &self.new_config());
        }
        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }

    /// Derive a prefab of another config type, under the same name.
    pub fn map<D, F>(
        &self,
        f: F,
    ) -> PreFabConfig<D>
    where
        D: 'static + Config + Debug + Clone,
        F: Fn(C) -> D + Send + Sync + 'static,
    {
        let builder = self.builder.clone();
        PreFabConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            builder: Arc::new(move || f(builder())),
        }
    }
}

/// A static, name-indexed table of prefabs.
#[derive(Debug)]
pub struct PreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// The table name; used in lookup errors.
    pub name: &'static str,

    /// The prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> PreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// The names of all prefabs, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Find a prefab by name.
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<&'static StaticPreFabConfig<C>> {
        self.items.iter().copied().find(|item| item.name == name)
    }

    /// Find a prefab by name.
    ///
    /// # Returns
    ///
    /// An error naming the known prefabs when `name` is not found.
    pub fn expect_lookup(
        &self,
        name: &str,
    ) -> anyhow::Result<&'static StaticPreFabConfig<C>> {
        self.lookup(name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown {} prefab {name:?}; expected one of {:?}",
                self.name,
                self.names()
            )
        })
    }
}
