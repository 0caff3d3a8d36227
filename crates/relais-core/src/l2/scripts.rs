//! Server-side invalidation scripts.
//!
//! The selective scripts decode each page's 19-byte bounds header
//! (`SR` magic, two little-endian i64 bounds, one flags byte) and delete
//! only the pages whose interval covers the modified sort value, all in
//! one round-trip. Running the decision on the server keeps the
//! read-check-delete sequence atomic; a client-side scan-and-delete loop
//! would race concurrent page writes.
//!
//! The flag decoding below must stay in lockstep with
//! `list::ListBoundsHeader`: bit 0 descending, bit 1 first page,
//! bit 2 incomplete, bit 3 cursor pagination.

/// Drain and delete a whole group: delete every tracked page key, then
/// the tracking set itself. KEYS[1] = group `_keys` set. Returns the
/// number of pages deleted.
pub const INVALIDATE_GROUP: &str = r"
local keys = redis.call('SMEMBERS', KEYS[1])
local count = 0
for _, key in ipairs(keys) do
    redis.call('DEL', key)
    count = count + 1
end
redis.call('DEL', KEYS[1])
return count
";

/// Selectively delete pages of a group affected by one sort value
/// (create/delete). KEYS[1] = group `_keys` set, ARGV[1] = sort value,
/// ARGV[2] = header size. Pages without a valid header are deleted.
pub const INVALIDATE_GROUP_SELECTIVE: &str = r"
local keys = redis.call('SMEMBERS', KEYS[1])
local entity_val = tonumber(ARGV[1])
local hdr_size = tonumber(ARGV[2])
local count = 0

local function read_int64(s, off)
    local b1,b2,b3,b4,b5,b6,b7,b8 = string.byte(s, off+1, off+8)
    local val = b1 + b2*256 + b3*65536 + b4*16777216
              + b5*4294967296 + b6*1099511627776
              + b7*281474976710656 + b8*72057594037927936
    if val >= 2^63 then val = val - 2^64 end
    return val
end

for _, page_key in ipairs(keys) do
    local hdr = redis.call('GETRANGE', page_key, 0, hdr_size - 1)
    local should_del = true

    if #hdr >= hdr_size and string.byte(hdr, 1) == 0x53 and string.byte(hdr, 2) == 0x52 then
        local first = read_int64(hdr, 2)
        local last  = read_int64(hdr, 10)
        local flags = string.byte(hdr, 19)
        local is_desc       = (flags % 2) == 1
        local is_first_page = (math.floor(flags / 2) % 2) == 1
        local is_incomplete = (math.floor(flags / 4) % 2) == 1
        local is_offset     = (math.floor(flags / 8) % 2) == 0

        if is_offset then
            if is_incomplete then
                should_del = true
            elseif is_desc then
                should_del = (entity_val >= last)
            else
                should_del = (entity_val <= last)
            end
        else
            if is_first_page and is_incomplete then
                should_del = true
            elseif is_desc then
                if is_first_page then
                    should_del = (entity_val >= last)
                elseif is_incomplete then
                    should_del = (entity_val <= first)
                else
                    should_del = (entity_val <= first and entity_val >= last)
                end
            else
                if is_first_page then
                    should_del = (entity_val <= last)
                elseif is_incomplete then
                    should_del = (entity_val >= first)
                else
                    should_del = (entity_val >= first and entity_val <= last)
                end
            end
        end
    end

    if should_del then
        redis.call('DEL', page_key)
        redis.call('SREM', KEYS[1], page_key)
        count = count + 1
    end
end

if count == #keys then redis.call('DEL', KEYS[1]) end
return count
";

/// Update variant: ARGV[1] = old sort value, ARGV[2] = new sort value,
/// ARGV[3] = header size. Offset pages use interval overlap; cursor pages
/// test each value for containment.
pub const INVALIDATE_GROUP_SELECTIVE_UPDATE: &str = r"
local keys = redis.call('SMEMBERS', KEYS[1])
local old_val = tonumber(ARGV[1])
local new_val = tonumber(ARGV[2])
local hdr_size = tonumber(ARGV[3])
local range_min = math.min(old_val, new_val)
local range_max = math.max(old_val, new_val)
local count = 0

local function read_int64(s, off)
    local b1,b2,b3,b4,b5,b6,b7,b8 = string.byte(s, off+1, off+8)
    local val = b1 + b2*256 + b3*65536 + b4*16777216
              + b5*4294967296 + b6*1099511627776
              + b7*281474976710656 + b8*72057594037927936
    if val >= 2^63 then val = val - 2^64 end
    return val
end

for _, page_key in ipairs(keys) do
    local hdr = redis.call('GETRANGE', page_key, 0, hdr_size - 1)
    local should_del = true

    if #hdr >= hdr_size and string.byte(hdr, 1) == 0x53 and string.byte(hdr, 2) == 0x52 then
        local first = read_int64(hdr, 2)
        local last  = read_int64(hdr, 10)
        local flags = string.byte(hdr, 19)
        local is_desc       = (flags % 2) == 1
        local is_first_page = (math.floor(flags / 2) % 2) == 1
        local is_incomplete = (math.floor(flags / 4) % 2) == 1
        local is_offset     = (math.floor(flags / 8) % 2) == 0

        if is_offset then
            local page_min = is_desc and last or first
            local page_max = is_desc and first or last
            if is_incomplete then
                should_del = (page_min <= range_max)
            else
                should_del = (page_min <= range_max) and (range_min <= page_max)
            end
        else
            local function in_range(val)
                if is_first_page and is_incomplete then return true end
                if is_desc then
                    if is_first_page then return val >= last end
                    if is_incomplete then return val <= first end
                    return val <= first and val >= last
                else
                    if is_first_page then return val <= last end
                    if is_incomplete then return val >= first end
                    return val >= first and val <= last
                end
            end
            should_del = in_range(old_val) or in_range(new_val)
        end
    end

    if should_del then
        redis.call('DEL', page_key)
        redis.call('SREM', KEYS[1], page_key)
        count = count + 1
    end
end

if count == #keys then redis.call('DEL', KEYS[1]) end
return count
";
