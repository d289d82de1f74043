//! Introspection data describing the shape of an application's object tree.

use std::fmt;

use crate::properties::OBJECT_MANAGER_INTERFACE;

struct InterfaceData {
    name: &'static str,
    members: &'static str,
}

const INTROSPECTABLE: InterfaceData = InterfaceData {
    name: "org.freedesktop.DBus.Introspectable",
    members: r#"    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
"#,
};

const OBJECT_MANAGER: InterfaceData = InterfaceData {
    name: OBJECT_MANAGER_INTERFACE,
    members: r#"    <method name="GetManagedObjects">
      <arg name="objects" type="a{oa{sa{sv}}}" direction="out"/>
    </method>
    <signal name="InterfacesAdded">
      <arg name="object" type="o"/>
      <arg name="interfaces" type="a{sa{sv}}"/>
    </signal>
    <signal name="InterfacesRemoved">
      <arg name="object" type="o"/>
      <arg name="interfaces" type="as"/>
    </signal>
"#,
};

const ROOT_INTERFACES: [&InterfaceData; 2] = [&INTROSPECTABLE, &OBJECT_MANAGER];

/// Introspection description of an application's root object.
///
/// Lists the two interfaces every root object carries and one child node per published service,
/// characteristic and descriptor. The [`Display`][fmt::Display] implementation renders the D-Bus
/// introspection XML document.
///
/// This is a flattened view of the whole tree, with nested names such as `service1/char1/desc1`.
/// It is not what a [`Session`][crate::Session] serves: the zbus object server answers
/// `Introspect` itself, listing only the direct children of each node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Introspection {
    children: Vec<String>,
}

impl Introspection {
    /// Describes the tree rooted at `root` that contains the objects at `paths`.
    ///
    /// Child names are relative to `root`, without the leading `/`.
    pub(crate) fn of_tree<'a>(root: &str, paths: impl IntoIterator<Item = &'a str>) -> Self {
        let prefix = match root {
            "/" => "",
            other => other,
        };
        let mut children = paths
            .into_iter()
            .map(|path| {
                path.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .unwrap_or_else(|| path.trim_start_matches('/'))
                    .to_string()
            })
            .collect::<Vec<_>>();
        children.sort();
        children.dedup();
        Self { children }
    }

    /// Returns the relative names of all child nodes, sorted.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Returns the names of the interfaces declared on the root node.
    pub fn interfaces(&self) -> impl Iterator<Item = &'static str> {
        ROOT_INTERFACES.iter().map(|intf| intf.name)
    }
}

impl fmt::Display for Introspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n",
        )?;
        f.write_str("<node>\n")?;
        for intf in ROOT_INTERFACES {
            writeln!(f, "  <interface name=\"{}\">", intf.name)?;
            f.write_str(intf.members)?;
            f.write_str("  </interface>\n")?;
        }
        for child in &self.children {
            writeln!(f, "  <node name=\"{}\"/>", child)?;
        }
        f.write_str("</node>\n")
    }
}
