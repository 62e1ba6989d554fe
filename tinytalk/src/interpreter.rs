use crate::{
    Reference, Runtime, RuntimeError, fatal_error,
    bytecode::{INLINED_BINARY_SELECTORS, Instruction, Op, constant},
    objects::{block, class, context, linkage, method, process},
    primitives::{BLOCK_EXECUTE, FIRST_INTEGER_BINARY},
};

// argument counts up to this are passed in a stack array
const INLINE_ARGUMENTS: usize = 8;

/// Where the temporaries and arguments of the running frame live.
#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Stack indices of argument 0 (the receiver) and temporary 0.
    Stack { arguments: usize, temporaries: usize },
    /// Arrays of a materialized context.
    Context {
        arguments: Reference,
        temporaries: Reference,
    },
}

/// States of the execution loop. Sends and returns always go back through
/// `Linkage`, which reloads every register from the current linkage frame.
#[derive(Debug, Clone, Copy)]
enum Step {
    Linkage,
    Fetch,
    Send { selector: Reference, class: Reference },
    /// Return the owned value from the frame at `link`.
    Return(Reference),
    Finished,
}

struct Interpreter<'a> {
    rt: &'a mut Runtime,
    process: Reference,
    stack: Reference,
    top: usize,
    link: usize,

    context: Reference,
    method: Reference,
    receiver: Reference,
    frame: Frame,
    bytecodes: Reference,
    code_len: usize,
    literals: Reference,
    offset: usize,

    // start of the receiver and arguments of the next send
    return_point: usize,
    steps: usize,
}

#[inline]
fn int(value: usize) -> Reference {
    Reference::from_small_int(value as i32)
}

#[inline]
fn index_of(value: Reference) -> usize {
    match value.small_int() {
        Some(value) if value >= 0 => value as usize,
        _ => fatal_error(RuntimeError::DeadStack),
    }
}

impl<'a> Interpreter<'a> {
    fn enter(rt: &'a mut Runtime, process: Reference, steps: usize) -> Option<Self> {
        let stack = rt.memory.slot(process, process::STACK);
        if stack.is_nil() {
            return None;
        }
        let link = rt.memory.slot(process, process::LINK_POINTER).small_int()? as usize;
        let top = index_of(rt.memory.slot(process, process::STACK_TOP));
        Some(Self {
            rt,
            process,
            stack,
            top,
            link,
            context: Reference::NIL,
            method: Reference::NIL,
            receiver: Reference::NIL,
            frame: Frame::Stack {
                arguments: 0,
                temporaries: 0,
            },
            bytecodes: Reference::NIL,
            code_len: 0,
            literals: Reference::NIL,
            offset: 0,
            return_point: top,
            steps,
        })
    }

    fn run(mut self) -> bool {
        let mut step = Step::Linkage;
        loop {
            step = match step {
                Step::Linkage => {
                    self.read_linkage();
                    Step::Fetch
                }
                Step::Fetch => {
                    if self.steps == 0 || self.rt.events.is_interrupted() {
                        self.suspend();
                        return true;
                    }
                    self.steps -= 1;
                    self.rt.stats.bytecodes += 1;
                    self.dispatch()
                }
                Step::Send { selector, class } => self.send(selector, class),
                Step::Return(value) => self.return_value(value),
                Step::Finished => return false,
            };
        }
    }

    // stack

    #[inline]
    fn stack_at(&self, index: usize) -> Reference {
        self.rt.memory.slot(self.stack, index)
    }

    #[inline]
    fn set_stack(&mut self, index: usize, value: Reference) {
        self.rt.memory.set_slot(self.stack, index, value);
    }

    #[inline]
    fn stack_top(&self) -> Reference {
        self.stack_at(self.top - 1)
    }

    #[inline]
    fn push(&mut self, value: Reference) {
        self.reserve(1);
        self.set_stack(self.top, value);
        self.top += 1;
    }

    /// Pushes a value whose count the caller already holds.
    #[inline]
    fn push_owned(&mut self, value: Reference) {
        self.reserve(1);
        self.rt.memory.set_slot_raw(self.stack, self.top, value);
        self.top += 1;
    }

    /// Pops the top value, handing its count to the caller.
    #[inline]
    fn pop_owned(&mut self) -> Reference {
        self.top -= 1;
        let value = self.stack_at(self.top);
        self.rt.memory.set_slot_raw(self.stack, self.top, Reference::NIL);
        value
    }

    #[inline]
    fn pop_discard(&mut self) {
        self.top -= 1;
        self.set_stack(self.top, Reference::NIL);
    }

    fn pop_to(&mut self, depth: usize) {
        while self.top > depth {
            self.pop_discard();
        }
    }

    #[inline]
    fn reserve(&mut self, needed: usize) {
        if self.top + needed > self.rt.memory.slot_count(self.stack) {
            self.grow_stack(needed);
        }
    }

    /// Makes room for `needed` more slots above the top.
    fn ensure_stack(&mut self, needed: usize) {
        self.reserve(needed);
    }

    fn grow_stack(&mut self, needed: usize) {
        let size = self.rt.memory.slot_count(self.stack);
        let new_size = size + needed.max(self.rt.settings.stack_growth);
        let grown = self.rt.new_array(new_size);
        for index in 0..self.top {
            let value = self.stack_at(index);
            self.rt.memory.set_slot(grown, index, value);
        }
        self.rt.memory.set_slot(self.process, process::STACK, grown);
        self.stack = grown;
        log::debug!("stack grown to {new_size} slots");
        if new_size > self.rt.settings.stack_limit {
            log::warn!("stack of {new_size} slots, forcing a yield");
            self.steps = 0;
        }
    }

    // frames

    fn read_linkage(&mut self) {
        let link = self.link;
        let return_point = index_of(self.stack_at(link + linkage::RETURN_POINT));
        self.context = self.stack_at(link + linkage::CONTEXT);
        if self.context.is_nil() {
            self.method = self.stack_at(link + linkage::METHOD);
            self.receiver = self.stack_at(return_point);
            self.frame = Frame::Stack {
                arguments: return_point,
                temporaries: link + linkage::SIZE,
            };
        } else {
            let memory = &self.rt.memory;
            self.method = memory.slot(self.context, context::METHOD);
            let arguments = memory.slot(self.context, context::ARGUMENTS);
            self.receiver = memory.slot(arguments, 0);
            self.frame = Frame::Context {
                arguments,
                temporaries: memory.slot(self.context, context::TEMPORARIES),
            };
        }
        self.bytecodes = self.rt.memory.slot(self.method, method::BYTECODES);
        self.code_len = self.rt.memory.byte_len(self.bytecodes);
        self.literals = self.rt.memory.slot(self.method, method::LITERALS);
        self.offset = index_of(self.stack_at(link + linkage::BYTE_OFFSET));
    }

    fn save_offset(&mut self) {
        self.set_stack(self.link + linkage::BYTE_OFFSET, int(self.offset));
    }

    fn suspend(&mut self) {
        self.save_offset();
        let memory = &mut self.rt.memory;
        memory.set_slot(self.process, process::STACK_TOP, int(self.top));
        memory.set_slot(self.process, process::LINK_POINTER, int(self.link));
    }

    fn finish(&mut self) -> Step {
        let memory = &mut self.rt.memory;
        memory.set_slot(self.process, process::STACK_TOP, int(self.top));
        memory.set_slot(self.process, process::LINK_POINTER, Reference::NIL);
        Step::Finished
    }

    fn slot_int(&self, object: Reference, index: usize) -> usize {
        self.rt
            .memory
            .slot(object, index)
            .small_int()
            .map_or(0, |value| value.max(0) as usize)
    }

    fn activate(&mut self, compiled: Reference) -> Step {
        let temporaries = self.slot_int(compiled, method::TEMPORARY_SIZE);
        let stack_size = self.slot_int(compiled, method::STACK_SIZE);
        self.save_offset();
        self.ensure_stack(linkage::SIZE + temporaries + stack_size);

        let new_link = self.top;
        self.push(int(self.link));
        self.push(Reference::NIL);
        self.push(int(self.return_point));
        self.push(compiled);
        self.push(int(0));
        for _ in 0..temporaries {
            self.push(Reference::NIL);
        }
        self.link = new_link;
        Step::Linkage
    }

    fn return_value(&mut self, value: Reference) -> Step {
        let return_point = index_of(self.stack_at(self.link + linkage::RETURN_POINT));
        let previous = self.stack_at(self.link + linkage::PREVIOUS_LINK);
        self.pop_to(return_point);
        self.push_owned(value);
        match previous.small_int() {
            Some(link) => {
                self.link = link as usize;
                Step::Linkage
            }
            None => self.finish(),
        }
    }

    fn block_return(&mut self, value: Reference) -> Step {
        if let Some(home) = self.home_frame() {
            self.link = home;
        } else {
            log::warn!("block return from a dead context, returning locally");
        }
        Step::Return(value)
    }

    // the frame that created the running block, if it is still live
    fn home_frame(&self) -> Option<usize> {
        if self.context.is_nil() {
            return None;
        }
        let home = self
            .rt
            .memory
            .slot(self.context, context::LINK_POINTER)
            .small_int()?;
        let home = usize::try_from(home).ok()?;
        (home + linkage::SIZE <= self.top && self.stack_at(home + linkage::CONTEXT) == self.context)
            .then_some(home)
    }

    fn push_context(&mut self) -> Step {
        if !self.context.is_nil() {
            self.push(self.context);
            return Step::Fetch;
        }
        let Frame::Stack {
            arguments,
            temporaries,
        } = self.frame
        else {
            return Step::Fetch;
        };
        let temporary_size = self.slot_int(self.method, method::TEMPORARY_SIZE);
        let argument_values: Vec<Reference> =
            (arguments..self.link).map(|i| self.stack_at(i)).collect();
        let temporary_values: Vec<Reference> = (temporaries..temporaries + temporary_size)
            .map(|i| self.stack_at(i))
            .collect();

        let arguments = self.rt.array_of(&argument_values);
        let temporaries = self.rt.array_of(&temporary_values);
        let context_class = self.rt.special.context_class;
        let new = self.rt.memory.allocate_with(
            context_class,
            &[int(self.link), self.method, arguments, temporaries],
        );
        log::trace!("materialized context {new} for frame {}", self.link);
        self.set_stack(self.link + linkage::CONTEXT, new);
        self.save_offset();
        self.push(new);
        Step::Linkage
    }

    // dispatch

    fn next_byte(&mut self) -> u8 {
        let byte = if self.offset < self.code_len {
            self.rt.memory.byte_at(self.bytecodes, self.offset)
        } else {
            0
        };
        self.offset += 1;
        byte
    }

    fn literal(&self, index: u8) -> Reference {
        self.rt.memory.slot(self.literals, index as usize)
    }

    fn argument(&self, index: u8) -> Reference {
        match self.frame {
            Frame::Stack { arguments, .. } => self.stack_at(arguments + index as usize),
            Frame::Context { arguments, .. } => self.rt.memory.slot(arguments, index as usize),
        }
    }

    fn temporary(&self, index: u8) -> Reference {
        match self.frame {
            Frame::Stack { temporaries, .. } => self.stack_at(temporaries + index as usize),
            Frame::Context { temporaries, .. } => {
                self.rt.memory.slot(temporaries, index as usize)
            }
        }
    }

    fn set_temporary(&mut self, index: u8, value: Reference) {
        match self.frame {
            Frame::Stack { temporaries, .. } => self.set_stack(temporaries + index as usize, value),
            Frame::Context { temporaries, .. } => {
                self.rt.memory.set_slot(temporaries, index as usize, value)
            }
        }
    }

    fn dispatch(&mut self) -> Step {
        let start = self.offset;
        let instruction = match Instruction::decode(|| self.next_byte()) {
            Ok(instruction) => instruction,
            Err(err) => fatal_error(RuntimeError::BadBytecode {
                opcode: err.byte,
                offset: start,
            }),
        };
        log::trace!("{start:>4} {instruction}");

        match instruction {
            Instruction::PushInstance(n) => {
                let value = self.rt.memory.slot(self.receiver, n as usize);
                self.push(value);
            }
            Instruction::PushArgument(n) => self.push(self.argument(n)),
            Instruction::PushTemporary(n) => self.push(self.temporary(n)),
            Instruction::PushLiteral(n) => self.push(self.literal(n)),
            Instruction::PushConstant(c) => {
                let value = match c {
                    0..=2 => Reference::from_small_int(c as i32),
                    constant::MINUS_ONE => Reference::from_small_int(-1),
                    constant::NIL => Reference::NIL,
                    constant::TRUE => self.rt.special.true_object,
                    constant::FALSE => self.rt.special.false_object,
                    constant::CONTEXT => return self.push_context(),
                    _ => fatal_error(RuntimeError::BadBytecode {
                        opcode: c,
                        offset: start,
                    }),
                };
                self.push(value);
            }
            Instruction::AssignInstance(n) => {
                let value = self.stack_top();
                self.rt.memory.set_slot(self.receiver, n as usize, value);
            }
            Instruction::AssignTemporary(n) => {
                let value = self.stack_top();
                self.set_temporary(n, value);
            }
            Instruction::MarkArguments(n) => {
                self.return_point = self.top - n as usize;
            }
            Instruction::SendMessage(n) => {
                let selector = self.literal(n);
                let receiver = self.stack_at(self.return_point);
                return Step::Send {
                    selector,
                    class: self.rt.class_of(receiver),
                };
            }
            Instruction::SendUnary(n) => return self.send_unary(n, start),
            Instruction::SendBinary(n) => return self.send_binary(n, start),
            Instruction::DoPrimitive { args, number } => {
                if args as usize > self.top - (self.link + linkage::SIZE) {
                    log::error!("primitive {number} wants {args} arguments, frame has fewer");
                    fatal_error(RuntimeError::BadBytecode {
                        opcode: Op::DoPrimitive as u8,
                        offset: start,
                    });
                }
                if number == BLOCK_EXECUTE {
                    return self.execute_block(args as usize);
                }
                self.primitive(args as usize, number);
            }
            Instruction::SelfReturn => {
                self.rt.memory.incr(self.receiver);
                return Step::Return(self.receiver);
            }
            Instruction::StackReturn => return Step::Return(self.pop_owned()),
            Instruction::BlockReturn => {
                let value = self.pop_owned();
                return self.block_return(value);
            }
            Instruction::Duplicate => self.push(self.stack_top()),
            Instruction::PopTop => self.pop_discard(),
            Instruction::Branch(target) => self.offset = target as usize,
            Instruction::BranchIfTrue(target) => {
                let condition = self.stack_top();
                self.pop_discard();
                if condition == self.rt.special.true_object {
                    self.offset = target as usize;
                }
            }
            Instruction::BranchIfFalse(target) => {
                let condition = self.stack_top();
                self.pop_discard();
                if condition == self.rt.special.false_object {
                    self.offset = target as usize;
                }
            }
            Instruction::AndBranch(target) => {
                if self.stack_top() == self.rt.special.false_object {
                    self.offset = target as usize;
                } else {
                    self.pop_discard();
                }
            }
            Instruction::OrBranch(target) => {
                if self.stack_top() == self.rt.special.true_object {
                    self.offset = target as usize;
                } else {
                    self.pop_discard();
                }
            }
            Instruction::SendToSuper(n) => {
                let selector = self.literal(n);
                let owner = self.rt.memory.slot(self.method, method::CLASS);
                return Step::Send {
                    selector,
                    class: self.rt.memory.slot(owner, class::SUPERCLASS),
                };
            }
        }
        Step::Fetch
    }

    fn send_unary(&mut self, n: u8, offset: usize) -> Step {
        let Some(&selector) = self.rt.special.unary_selectors.get(n as usize) else {
            fatal_error(RuntimeError::BadBytecode { opcode: n, offset });
        };
        let receiver = self.stack_top();
        // isNil and notNil on nil
        if receiver.is_nil() && n < 2 {
            self.pop_discard();
            self.push(self.rt.boolean(n == 0));
            return Step::Fetch;
        }
        self.return_point = self.top - 1;
        Step::Send {
            selector,
            class: self.rt.class_of(receiver),
        }
    }

    fn send_binary(&mut self, n: u8, offset: usize) -> Step {
        let Some(&selector) = self.rt.special.binary_selectors.get(n as usize) else {
            fatal_error(RuntimeError::BadBytecode { opcode: n, offset });
        };
        let left = self.stack_at(self.top - 2);
        let right = self.stack_top();
        if n < INLINED_BINARY_SELECTORS
            && let (Some(a), Some(b)) = (left.small_int(), right.small_int())
        {
            let result = self.rt.integer_binary(FIRST_INTEGER_BINARY + n, a, b);
            if !result.is_nil() {
                self.pop_discard();
                self.pop_discard();
                self.push(result);
                return Step::Fetch;
            }
        }
        self.return_point = self.top - 2;
        Step::Send {
            selector,
            class: self.rt.class_of(left),
        }
    }

    fn primitive(&mut self, argc: usize, number: u8) {
        let base = self.top - argc;
        let mut inline = [Reference::NIL; INLINE_ARGUMENTS];
        let spilled: Vec<Reference>;
        let arguments = if argc <= INLINE_ARGUMENTS {
            for (i, argument) in inline.iter_mut().take(argc).enumerate() {
                *argument = self.stack_at(base + i);
            }
            &inline[..argc]
        } else {
            spilled = (base..self.top).map(|i| self.stack_at(i)).collect();
            &spilled[..]
        };
        let result = self.rt.primitive(number, arguments);
        self.rt.memory.incr(result);
        for _ in 0..argc {
            self.pop_discard();
        }
        self.push_owned(result);
    }

    // primitive 8: the block and its arguments are on top of the stack
    fn execute_block(&mut self, argc: usize) -> Step {
        let return_point = self.top - argc;
        let target = self.stack_at(return_point);
        let runnable = argc > 0
            && self.rt.class_of(target) == self.rt.special.block_class
            && self.rt.memory.slot(target, block::ARGUMENT_COUNT).small_int()
                == Some(argc as i32 - 1);
        if !runnable {
            log::debug!("block execute with {argc} arguments declined");
            self.pop_to(return_point);
            self.push(Reference::NIL);
            return Step::Fetch;
        }

        let home = self.rt.memory.slot(target, block::CONTEXT);
        let location = self.slot_int(target, block::ARGUMENT_LOCATION);
        let start = self.slot_int(target, block::BYTECODE_POSITION);
        let temporaries = self.rt.memory.slot(home, context::TEMPORARIES);
        for i in 0..argc - 1 {
            let value = self.stack_at(return_point + 1 + i);
            self.rt.memory.set_slot(temporaries, location + i, value);
        }
        self.pop_to(return_point + 1);

        let home_method = self.rt.memory.slot(home, context::METHOD);
        let stack_size = self.slot_int(home_method, method::STACK_SIZE);
        self.save_offset();
        self.ensure_stack(linkage::SIZE + stack_size);

        let new_link = self.top;
        self.push(int(self.link));
        self.push(home);
        self.push(int(return_point));
        self.push(Reference::NIL);
        self.push(int(start));
        self.link = new_link;
        Step::Linkage
    }

    // sends

    fn send(&mut self, selector: Reference, class: Reference) -> Step {
        self.rt.stats.sends += 1;
        log::trace!(
            "send #{} to {}",
            self.rt.memory.string(selector),
            self.rt.class_name(class)
        );
        match self.rt.lookup(selector, class) {
            Some(found) => self.activate(found.method),
            None => self.not_understood(selector),
        }
    }

    // replaces `receiver args...` with `receiver selector #(args...)`
    fn not_understood(&mut self, selector: Reference) -> Step {
        let receiver_at = self.return_point;
        let values: Vec<Reference> = (receiver_at + 1..self.top)
            .map(|i| self.stack_at(i))
            .collect();
        let arguments = self.rt.array_of(&values);
        self.rt.memory.incr(arguments);
        self.pop_to(receiver_at + 1);
        self.push(selector);
        self.push_owned(arguments);

        let receiver = self.stack_at(receiver_at);
        let class = self.rt.class_of(receiver);
        let recovery = self.rt.special.does_not_understand;
        log::debug!(
            "{} does not understand #{}",
            self.rt.class_name(class),
            self.rt.memory.string(selector)
        );
        match self.rt.lookup(recovery, class) {
            Some(found) => self.activate(found.method),
            None => fatal_error(RuntimeError::MessageNotUnderstood {
                selector: self.rt.memory.string(selector),
            }),
        }
    }
}

impl Runtime {
    /// Runs `process` for at most `max_steps` bytecodes.
    ///
    /// Answers true when the process stopped early (budget used up, interrupt,
    /// forced yield) and should be resumed, false when it has returned from
    /// its outermost frame.
    pub fn execute(&mut self, process: Reference, max_steps: usize) -> bool {
        self.events.clear_interrupt();
        match Interpreter::enter(self, process, max_steps) {
            Some(interpreter) => interpreter.run(),
            None => false,
        }
    }

    /// A process that sends `selector` to `receiver` with `args`.
    ///
    /// The caller owns one count of the returned process.
    pub fn new_send_process(
        &mut self,
        receiver: Reference,
        selector: &str,
        args: &[Reference],
    ) -> Result<Reference, RuntimeError> {
        let selector_symbol = self.intern(selector);
        let class = self.class_of(receiver);
        let Some(found) = self.lookup(selector_symbol, class) else {
            return Err(RuntimeError::MessageNotUnderstood {
                selector: selector.to_owned(),
            });
        };
        let temporaries = self
            .memory
            .slot(found.method, method::TEMPORARY_SIZE)
            .small_int()
            .unwrap_or(0)
            .max(0) as usize;
        let stack_size = self
            .memory
            .slot(found.method, method::STACK_SIZE)
            .small_int()
            .unwrap_or(0)
            .max(0) as usize;
        let link = 1 + args.len();
        let top = link + linkage::SIZE + temporaries;
        let stack = self.new_array((top + stack_size).max(self.settings.stack_growth));

        self.memory.set_slot(stack, 0, receiver);
        for (i, &argument) in args.iter().enumerate() {
            self.memory.set_slot(stack, 1 + i, argument);
        }
        self.memory
            .set_slot(stack, link + linkage::RETURN_POINT, Reference::from_small_int(0));
        self.memory.set_slot(stack, link + linkage::METHOD, found.method);
        self.memory
            .set_slot(stack, link + linkage::BYTE_OFFSET, Reference::from_small_int(0));

        Ok(self.new_process(stack, top, link))
    }

    /// A process that runs `block`, which must take no arguments.
    ///
    /// The caller owns one count of the returned process.
    pub fn new_block_process(&mut self, target: Reference) -> Reference {
        let home = self.memory.slot(target, block::CONTEXT);
        let start = self.memory.slot(target, block::BYTECODE_POSITION);
        let home_method = self.memory.slot(home, context::METHOD);
        let stack_size = self
            .memory
            .slot(home_method, method::STACK_SIZE)
            .small_int()
            .unwrap_or(0)
            .max(0) as usize;
        let link = 1;
        let top = link + linkage::SIZE;
        let stack = self.new_array((top + stack_size).max(self.settings.stack_growth));

        self.memory.set_slot(stack, 0, target);
        self.memory.set_slot(stack, link + linkage::CONTEXT, home);
        self.memory
            .set_slot(stack, link + linkage::RETURN_POINT, Reference::from_small_int(0));
        self.memory.set_slot(stack, link + linkage::BYTE_OFFSET, start);

        self.new_process(stack, top, link)
    }

    fn new_process(&mut self, stack: Reference, top: usize, link: usize) -> Reference {
        let process_class = self.special.process_class;
        let new = self.memory.allocate_with(
            process_class,
            &[
                stack,
                Reference::from_small_int(top as i32),
                Reference::from_small_int(link as i32),
            ],
        );
        self.memory.incr(new);
        new
    }

    /// True once the process has returned from its outermost frame.
    pub fn is_finished(&self, process: Reference) -> bool {
        self.memory.slot(process, process::LINK_POINTER).is_nil()
    }

    pub fn process_stack_depth(&self, process: Reference) -> usize {
        self.memory
            .slot(process, process::STACK_TOP)
            .small_int()
            .map_or(0, |top| top.max(0) as usize)
    }

    /// Top of the process stack, the answer of a finished process.
    pub fn process_result(&self, process: Reference) -> Reference {
        match self.process_stack_depth(process) {
            0 => Reference::NIL,
            depth => {
                let stack = self.memory.slot(process, process::STACK);
                self.memory.slot(stack, depth - 1)
            }
        }
    }
}
