//! Author-filtered projection of reply trees
//!
//! Selects the chains of replies written by one author. Filtering is per
//! level: a reply by anyone else is dropped together with its whole
//! subtree, even if a deeper reply is by the author again. Each level
//! consumes one unit of the depth budget; a budget of zero yields nothing.

/// A node in a reply tree
///
/// Nodes that cannot be traversed (deleted, blocked or unknown branch
/// types) return `None` from [`view`](ReplyTree::view) and are skipped.
pub trait ReplyTree: Sized {
    type Item;

    /// The node's item and its direct replies
    fn view(&self) -> Option<(&Self::Item, &[Self])>;
}

/// Items with an author identity
pub trait Authored {
    fn author_id(&self) -> &str;
}

/// A projected reply with its own projected replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projected<'a, T> {
    pub item: &'a T,
    pub replies: Vec<Projected<'a, T>>,
}

/// Author's replies in pre-order, parents before their replies
///
/// Uses an explicit work stack, so deep trees do not grow the call stack.
pub fn flatten_by_author<'a, N>(nodes: &'a [N], author: &str, depth: usize) -> Vec<&'a N::Item>
where
    N: ReplyTree,
    N::Item: Authored,
{
    let mut out = Vec::new();
    let mut stack: Vec<(&'a N, usize)> = nodes.iter().rev().map(|n| (n, depth)).collect();

    while let Some((node, budget)) = stack.pop() {
        if budget == 0 {
            continue;
        }
        let Some((item, replies)) = node.view() else {
            continue;
        };
        if item.author_id() != author {
            continue;
        }
        out.push(item);
        stack.extend(replies.iter().rev().map(|r| (r, budget - 1)));
    }
    out
}

/// Author's replies with nesting preserved
///
/// Recursion is bounded by `depth`.
pub fn project_by_author<'a, N>(nodes: &'a [N], author: &str, depth: usize) -> Vec<Projected<'a, N::Item>>
where
    N: ReplyTree,
    N::Item: Authored,
{
    if depth == 0 {
        return Vec::new();
    }
    nodes
        .iter()
        .filter_map(ReplyTree::view)
        .filter(|(item, _)| item.author_id() == author)
        .map(|(item, replies)| Projected {
            item,
            replies: project_by_author(replies, author, depth - 1),
        })
        .collect()
}
