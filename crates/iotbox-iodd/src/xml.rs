// Namespace-aware lookup helpers over roxmltree nodes, scoped to the IODD namespace.

use roxmltree::Node;

use iotbox_common::IODD_NAMESPACE;

pub(crate) const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub(crate) fn is_iodd_element(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(IODD_NAMESPACE)
}

pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| is_iodd_element(c, name))
}

pub(crate) fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |c| is_iodd_element(c, name))
}

/// Follows a path of child element names, taking the first match on every level.
pub(crate) fn path<'a, 'input>(node: Node<'a, 'input>, names: &[&str]) -> Option<Node<'a, 'input>> {
    names.iter().try_fold(node, |current, name| child(current, name))
}

/// `xsi:type` of a datatype element, e.g. `UIntegerT`.
pub(crate) fn xsi_type<'a>(node: &Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XSI_NAMESPACE, "type"))
}
