//! The module descriptor: self-declared identity, dependencies, compiler
//! plugins, filters, and metadata, and its JSON wire form.

use std::fmt;

use module_core::ModuleId;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ArchiveError;

pub const DEFAULT_DESCRIPTOR_ENTRY: &str = "moduleSpec.json";

/// An insertion-order-preserving set. Duplicate inserts are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedSet<T>(Vec<T>);

impl<T: PartialEq> OrderedSet<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, value: T) {
        if !self.0.contains(&value) {
            self.0.push(value);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.0.contains(value)
    }
}

impl<T> FromIterator<T> for OrderedSet<T>
where
    T: PartialEq,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<T> IntoIterator for OrderedSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: Serialize> Serialize for OrderedSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for item in &self.0 {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl<'de, T> Deserialize<'de> for OrderedSet<T>
where
    T: Deserialize<'de> + PartialEq,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SeqVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T> Visitor<'de> for SeqVisitor<T>
        where
            T: Deserialize<'de> + PartialEq,
        {
            type Value = OrderedSet<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut set = OrderedSet::new();
                while let Some(item) = seq.next_element()? {
                    set.insert(item);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_seq(SeqVisitor(std::marker::PhantomData))
    }
}

/// An insertion-order-preserving string-to-string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap(Vec<(String, String)>);

impl OrderedMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: String, value: String) {
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = OrderedMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string-to-string map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = OrderedMap::new();
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    out.insert(k, v);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// The module's self-description: identity, dependencies, compiler plugins,
/// linkage filters, and free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    pub module_id: ModuleId,
    pub compiler_plugin_ids: OrderedSet<String>,
    pub module_dependencies: OrderedSet<String>,
    pub archive_metadata: OrderedMap,
    pub module_import_filter: OrderedSet<String>,
    pub module_export_filter: OrderedSet<String>,
    pub app_import_filter: OrderedSet<String>,
}

impl ArchiveDescriptor {
    pub fn synthesized(module_id: ModuleId) -> Self {
        Self {
            module_id,
            compiler_plugin_ids: OrderedSet::new(),
            module_dependencies: OrderedSet::new(),
            archive_metadata: OrderedMap::new(),
            module_import_filter: OrderedSet::new(),
            module_export_filter: OrderedSet::new(),
            app_import_filter: OrderedSet::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireDescriptor {
    #[serde(rename = "moduleId")]
    module_id: String,
    #[serde(rename = "compilerPluginIds", default)]
    compiler_plugin_ids: OrderedSet<String>,
    #[serde(rename = "moduleDependencies", default)]
    module_dependencies: OrderedSet<String>,
    #[serde(rename = "archiveMetadata", default)]
    archive_metadata: OrderedMap,
    #[serde(rename = "moduleImportFilter", default)]
    module_import_filter: OrderedSet<String>,
    #[serde(rename = "moduleExportFilter", default)]
    module_export_filter: OrderedSet<String>,
    #[serde(rename = "appImportFilter", default)]
    app_import_filter: OrderedSet<String>,
}

/// Serializes and parses [`ArchiveDescriptor`] to and from its JSON wire
/// form. Unknown top-level fields are ignored rather than rejected, per the
/// wire-format contract's forward-compatibility guarantee.
pub struct DescriptorCodec;

impl DescriptorCodec {
    pub fn parse(bytes: &[u8]) -> Result<ArchiveDescriptor, ArchiveError> {
        let wire: WireDescriptor = serde_json::from_slice(bytes)?;
        let module_id = ModuleId::parse(&wire.module_id)?;
        Ok(ArchiveDescriptor {
            module_id,
            compiler_plugin_ids: wire.compiler_plugin_ids,
            module_dependencies: wire.module_dependencies,
            archive_metadata: wire.archive_metadata,
            module_import_filter: wire.module_import_filter,
            module_export_filter: wire.module_export_filter,
            app_import_filter: wire.app_import_filter,
        })
    }

    pub fn format(descriptor: &ArchiveDescriptor) -> Result<Vec<u8>, ArchiveError> {
        let wire = WireDescriptor {
            module_id: descriptor.module_id.format(),
            compiler_plugin_ids: descriptor.compiler_plugin_ids.clone(),
            module_dependencies: descriptor.module_dependencies.clone(),
            archive_metadata: descriptor.archive_metadata.clone(),
            module_import_filter: descriptor.module_import_filter.clone(),
            module_export_filter: descriptor.module_export_filter.clone(),
            app_import_filter: descriptor.app_import_filter.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }
}
