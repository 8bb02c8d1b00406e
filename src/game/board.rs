//! Game Board
//!
//! The 6×7 Connect-Four grid as a graph of linked nodes plus per-column
//! fill heights. Tokens fall to the lowest empty row of a column; the
//! heights make placement O(1) and gravity an invariant rather than a
//! search.

use crate::game::direction::Direction;
use crate::game::error::GameError;
use crate::game::node::{self, Cell, Node, NodeId};

/// Number of rows on the board.
pub const ROWS: usize = 6;
/// Number of columns on the board.
pub const COLS: usize = 7;
/// Run length required to win.
pub const WIN_LENGTH: usize = 4;

/// The game board as a graph of connected nodes.
#[derive(Clone, Debug)]
pub struct Board {
    nodes: Vec<Node>,
    col_heights: [usize; COLS],
}

impl Board {
    /// Create a new board and build the node graph.
    pub fn new() -> Self {
        let mut board = Self {
            nodes: Vec::with_capacity(ROWS * COLS),
            col_heights: [0; COLS],
        };
        board.build_graph();
        board
    }

    // Creates all nodes and establishes neighbor links. Only the four
    // "forward" directions are set explicitly; set_neighbor mirrors the
    // opposite link.
    fn build_graph(&mut self) {
        for row in 0..ROWS {
            for col in 0..COLS {
                self.nodes.push(Node::new(row, col));
            }
        }

        for row in 0..ROWS {
            for col in 0..COLS {
                let id = Self::id_at(row, col);

                if col + 1 < COLS {
                    node::set_neighbor(&mut self.nodes, id, Direction::Right, Self::id_at(row, col + 1));
                }
                if row + 1 < ROWS {
                    node::set_neighbor(&mut self.nodes, id, Direction::Down, Self::id_at(row + 1, col));
                }
                if row + 1 < ROWS && col + 1 < COLS {
                    node::set_neighbor(&mut self.nodes, id, Direction::DownRight, Self::id_at(row + 1, col + 1));
                }
                if row + 1 < ROWS && col > 0 {
                    node::set_neighbor(&mut self.nodes, id, Direction::DownLeft, Self::id_at(row + 1, col - 1));
                }
            }
        }
    }

    #[inline]
    fn id_at(row: usize, col: usize) -> NodeId {
        row * COLS + col
    }

    /// Check if a column can accept a token.
    fn can_play(&self, col: usize) -> bool {
        col < COLS && self.col_heights[col] < ROWS
    }

    /// Drop a token in the given column for the given player.
    ///
    /// Returns the node the token landed on, or [`GameError::InvalidMove`]
    /// when the column is out of range or full.
    pub fn play(&mut self, col: usize, player: Cell) -> Result<NodeId, GameError> {
        if !self.can_play(col) {
            return Err(GameError::InvalidMove);
        }

        let row = ROWS - 1 - self.col_heights[col];
        let id = Self::id_at(row, col);
        self.nodes[id].owner = player;
        self.col_heights[col] += 1;

        Ok(id)
    }

    /// Check if the last played node completes a winning run.
    pub fn check_win(&self, id: NodeId) -> bool {
        node::check_win(&self.nodes, id, WIN_LENGTH)
    }

    /// Check if the board is completely full.
    pub fn is_full(&self) -> bool {
        self.col_heights.iter().all(|&h| h == ROWS)
    }

    /// The node behind an id returned by [`Board::play`].
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// The node at the given position, if in range.
    pub fn node_at(&self, row: usize, col: usize) -> Option<&Node> {
        if row < ROWS && col < COLS {
            self.nodes.get(Self::id_at(row, col))
        } else {
            None
        }
    }

    /// The topmost occupied node of a column, if any.
    pub fn top_node(&self, col: usize) -> Option<&Node> {
        if col >= COLS || self.col_heights[col] == 0 {
            return None;
        }
        let row = ROWS - self.col_heights[col];
        self.nodes.get(Self::id_at(row, col))
    }

    /// Fill height of a column.
    pub fn col_height(&self, col: usize) -> usize {
        self.col_heights[col]
    }

    /// Clear the board for a new game.
    pub fn reset(&mut self) {
        for n in &mut self.nodes {
            n.owner = Cell::Empty;
        }
        self.col_heights = [0; COLS];
    }

    /// Export the board state as a 2D array of wire cells, row 0 on top.
    pub fn to_array(&self) -> [[u8; COLS]; ROWS] {
        let mut arr = [[0u8; COLS]; ROWS];
        for row in 0..ROWS {
            for col in 0..COLS {
                arr[row][col] = self.nodes[Self::id_at(row, col)].owner.as_u8();
            }
        }
        arr
    }

    /// Number of non-empty cells.
    pub fn token_count(&self) -> usize {
        self.col_heights.iter().sum()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
