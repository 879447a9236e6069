//! Property tests for the scrollback pointers: any sequence of feeds and
//! scroll motions keeps the origin inside the retained history and never
//! panics, including paging at the very top and bottom.

use core_term::screen::Screen;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Type(String),
    Newlines(u8),
    PageUp,
    PageDown,
    LineUp(u8),
    LineDown(u8),
    Reset,
    Resize(u8, u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[ -~]{0,20}".prop_map(Op::Type),
        (0u8..40).prop_map(Op::Newlines),
        Just(Op::PageUp),
        Just(Op::PageDown),
        (0u8..10).prop_map(Op::LineUp),
        (0u8..10).prop_map(Op::LineDown),
        Just(Op::Reset),
        (1u8..30, 1u8..20).prop_map(|(c, r)| Op::Resize(c, r)),
    ]
}

proptest! {
    #[test]
    fn scroll_motions_never_underflow(ops in proptest::collection::vec(op_strategy(), 0..60)) {
        let mut screen = Screen::new(10, 4, 25);
        for op in ops {
            match op {
                Op::Type(s) => {
                    for ch in s.chars() {
                        screen.put_char(ch);
                    }
                }
                Op::Newlines(n) => {
                    for _ in 0..n {
                        screen.carriage_return();
                        screen.line_feed();
                    }
                }
                Op::PageUp => screen.sb_page_up(),
                Op::PageDown => screen.sb_page_down(),
                Op::LineUp(n) => screen.sb_up(n as usize),
                Op::LineDown(n) => screen.sb_down(n as usize),
                Op::Reset => screen.sb_reset(),
                Op::Resize(c, r) => screen.resize(c as usize, r as usize),
            }
            // Origin can never point past the retained history.
            prop_assert!(screen.scrollback_origin() <= 25);
            // Drawing the visible region must always be well-formed.
            let mut cells = 0usize;
            screen.draw(|_| cells += 1);
            prop_assert_eq!(cells, screen.cols() * screen.rows());
        }
    }
}
