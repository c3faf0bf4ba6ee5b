fn main() {
    let mut heap = ember_core::Heap::new();
    let script = emberc::compiler::compile(b"print 1 + 2 * 3;", &mut heap).unwrap();
    let f = heap.get(script).as_function().unwrap();
    println!("chunk len = {}", f.chunk.code.len());
    println!("code = {:?}", f.chunk.code);
}
