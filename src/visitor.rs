use crate::ast::{
    ComponentNode, ElementNode, ExpressionNode, RootNode, TemplateAst, TemplateNode, TextNode,
};

/// The TemplateVisitor trait defines the single authoritative traversal mechanism for Template ASTs.
///
/// Rules:
/// 1. Traversal order is depth-first, document order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call `walk_*` functions to continue traversal unless pruning is intended.
pub trait TemplateVisitor<'a> {
    fn visit_ast(&mut self, ast: &'a TemplateAst) {
        self.visit_root(&ast.root);
    }

    fn visit_root(&mut self, root: &'a RootNode) {
        walk_root(self, root);
    }

    fn visit_node(&mut self, node: &'a TemplateNode) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &'a ElementNode) {
        walk_element(self, element);
    }

    fn visit_component(&mut self, component: &'a ComponentNode) {
        walk_component(self, component);
    }

    fn visit_text(&mut self, _text: &'a TextNode) {
        // Leaf node, nothing to walk by default
    }

    fn visit_expression(&mut self, expression: &'a ExpressionNode) {
        walk_expression(self, expression);
    }

    fn visit_children(&mut self, children: &'a [TemplateNode]) {
        walk_children(self, children);
    }
}

pub fn walk_root<'a, V: TemplateVisitor<'a> + ?Sized>(visitor: &mut V, root: &'a RootNode) {
    visitor.visit_children(&root.children);
}

pub fn walk_children<'a, V: TemplateVisitor<'a> + ?Sized>(
    visitor: &mut V,
    children: &'a [TemplateNode],
) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<'a, V: TemplateVisitor<'a> + ?Sized>(visitor: &mut V, node: &'a TemplateNode) {
    match node {
        TemplateNode::Root(r) => visitor.visit_root(r),
        TemplateNode::Element(el) => visitor.visit_element(el),
        TemplateNode::Component(c) => visitor.visit_component(c),
        TemplateNode::Text(t) => visitor.visit_text(t),
        TemplateNode::Expression(e) => visitor.visit_expression(e),
    }
}

pub fn walk_element<'a, V: TemplateVisitor<'a> + ?Sized>(
    visitor: &mut V,
    element: &'a ElementNode,
) {
    visitor.visit_children(&element.children);
}

pub fn walk_component<'a, V: TemplateVisitor<'a> + ?Sized>(
    visitor: &mut V,
    component: &'a ComponentNode,
) {
    visitor.visit_children(&component.children);
}

pub fn walk_expression<'a, V: TemplateVisitor<'a> + ?Sized>(
    visitor: &mut V,
    expression: &'a ExpressionNode,
) {
    visitor.visit_children(&expression.children);
}

/// Collects every component invocation in document order.
#[derive(Default)]
pub struct ComponentCollector<'a> {
    pub components: Vec<&'a ComponentNode>,
}

impl<'a> TemplateVisitor<'a> for ComponentCollector<'a> {
    fn visit_component(&mut self, component: &'a ComponentNode) {
        self.components.push(component);
        walk_component(self, component);
    }
}

pub fn collect_components(ast: &TemplateAst) -> Vec<&ComponentNode> {
    let mut collector = ComponentCollector::default();
    collector.visit_ast(ast);
    collector.components
}
